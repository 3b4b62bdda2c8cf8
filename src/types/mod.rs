pub mod candle;
pub mod signals;
pub mod stream;

pub use candle::*;
pub use signals::*;
pub use stream::*;
