pub mod sync;

mod trace;

pub use trace::init_tracing;

#[doc(inline)]
pub use sync::mpmc::{Channel, RecvError, SendError, Timeout, TryRecvError, TrySendError};
