//! Stream session state machine
//!
//! One [`StreamSession`] drives either the sending or the receiving side of
//! a link. The control surface, the audio callback and the network receive
//! path all call into the same session from their own threads.

pub mod state;
pub mod stream;

pub use state::{SessionEvent, SessionState};
pub use stream::{SessionStats, StreamSession};
