pub mod okx;
pub mod traits;

pub use okx::OkxDexClient;
pub use traits::*;
