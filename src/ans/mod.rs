pub use alias::{init_alias_table, AliasEntry};
pub use encoding::{AnsCoder, EncSymbolInfo};

pub mod alias;
pub mod encoding;
pub mod normalize;
