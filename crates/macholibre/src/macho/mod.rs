pub mod parser;

pub use parser::{GoblinParser, ThinInfo, ThinParseError, ThinParser, MAX_ALIGN, MIN_ALIGN};
