//! Dual-layer signature document parsing, canonicalization and
//! verification. The parser is a hand-written depth-aware scanner rather
//! than a generic JSON library — see `parser`'s module doc for why.

pub mod canonical;
pub mod document;
pub mod parser;
mod scan;
pub mod verify;

pub use document::{PlatformEntry, PlatformLayer, SignatureDocument};
pub use parser::parse_document;
pub use verify::{read_dev_public_key, read_signature_document, verify_binary_hash, verify_document, VerifiedDocument};
