//! Modelos neutrales (ArrayData, Artifact, fingerprints, ExecutionContext).

pub mod array;
pub mod artifact;
pub mod context;
pub mod fingerprint;

pub use array::ArrayData;
pub use artifact::{Artifact, ArtifactBundle, ArtifactDescriptor, ArtifactKind, ArtifactPayload, ArtifactRef, RawInputs};
pub use context::ExecutionContext;
pub use fingerprint::{output_fingerprint, NodeFingerprintInput};
