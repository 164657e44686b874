// Matrix loading
// YAML parsing, semantic validation and helpful error messages

pub mod error;
pub mod yaml;

pub use error::{ParseError, ParseErrorKind, ParseResult};
pub use yaml::{MatrixSource, MatrixValidator, YamlMatrixSource};
