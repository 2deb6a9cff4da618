//! Transport bindings for the engine's capability seam

pub mod kube;

pub use self::kube::{KubeClientFactory, KubeContextClient};
