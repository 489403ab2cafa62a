mod seed;
mod stream;

pub use seed::*;
pub use stream::*;
