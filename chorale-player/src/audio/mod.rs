//! Audio sources
//!
//! The engine talks to tracks through [`MediaElement`]. [`ReportedElement`]
//! mirrors a track playing in the UI client; [`ClockedElement`] is the
//! headless implementation whose cursor runs off a [`Clock`].

pub mod clock;
pub mod duration;
pub mod element;
pub mod reported;

pub use clock::{Clock, ManualClock, SystemClock};
pub use duration::measure_duration;
pub use element::{ClockedElement, MediaElement, MediaReport};
pub use reported::ReportedElement;
