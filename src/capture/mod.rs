//! Recording of satellite passes to WAV files, either from an RTL-SDR
//! subprocess or via synthetic tone generation for hardware-free operation.

mod runner;
mod satellite;
mod wav;

pub use runner::{CaptureError, CaptureOutcome, CaptureRequest, Capturer};
pub use satellite::{by_name, by_norad_id, Satellite, SATELLITES};
