pub mod error;
pub mod store;

pub use error::{AllocError, FormatError, SetupError, StoreError};
pub use store::{Allocation, Counter, CounterStore};
