pub mod force_release;
pub mod hold;
pub mod replicas;
