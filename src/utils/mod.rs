pub mod code_lines;

pub use code_lines::parse_code_lines;
