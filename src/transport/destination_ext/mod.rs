//! Transport-layer behaviour attached to destinations: link establishment
//! and the link ID derivation it depends on.

pub mod link;
