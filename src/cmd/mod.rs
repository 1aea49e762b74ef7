pub mod validate;

pub use validate::{ValidateArgs, handle_validate};
