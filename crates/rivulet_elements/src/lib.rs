//! Rivulet Element Shims
//!
//! Typed builders user scripts call to put elements on screen. Each call
//! resolves the thread-local run context, claims the next tree coordinate,
//! and queues a delta; widget builders additionally register metadata with
//! the state registry and hand back the widget's current value, so the
//! call reads as "draw this and tell me its state".
//!
//! ```no_run
//! use rivulet_elements as rv;
//!
//! fn app() -> Result<(), rivulet_runtime::ScriptError> {
//!     rv::text("Volume control")?;
//!     let volume = rv::Slider::new("volume", 0.0, 11.0).show()?;
//!     if rv::Button::new("save").show()? {
//!         rv::text(format!("saved at {volume}"))?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod display;
pub mod layout;
pub mod widgets;

pub use display::{page_config, table, text, TableHandle};
pub use layout::{form, horizontal, vertical};
pub use widgets::{Button, Checkbox, FileUploader, Slider, TextInput};

// Fragments are declared from element code often enough that re-exporting
// keeps scripts on one import.
pub use rivulet_runtime::fragment::fragment;
