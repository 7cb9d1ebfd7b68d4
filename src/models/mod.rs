mod event;
mod priority;
mod property;
mod record;
mod request;
mod sanitize;

pub use event::*;
pub use priority::*;
pub use property::*;
pub use record::*;
pub(crate) use request::*;
pub(crate) use sanitize::*;
