// Internal
pub mod assignments;
pub mod codec;
pub mod transport;
// Exports
pub use assignments::*;
pub use codec::*;
pub use transport::*;
