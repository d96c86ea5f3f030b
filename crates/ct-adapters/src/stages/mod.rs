//! Stages CT: cada uno implementa `TypedStage` con parámetros tipados y un
//! `StageBinding` reemplazable (id + artifacts de entrada/salida).
//!
//! Cadena estándar:
//! crop -> normalize -> gamma_filter -> ring_removal -> rotation_center ->
//! reconstruct -> circular_mask

/// Declara el struct del stage con su cableado por defecto.
macro_rules! bound_stage {
    ($ty:ident, $id:literal, [$($inp:literal),*], [$($out:literal),*]) => {
        #[derive(Debug, Clone)]
        pub struct $ty {
            binding: $crate::binding::StageBinding,
        }

        impl $ty {
            pub fn new() -> Self {
                Self::with_binding(Self::default_binding())
            }

            pub fn default_binding() -> $crate::binding::StageBinding {
                $crate::binding::StageBinding::new($id, &[$($inp),*], &[$($out),*])
            }

            pub fn with_binding(binding: $crate::binding::StageBinding) -> Self {
                Self { binding }
            }

            pub fn binding(&self) -> &$crate::binding::StageBinding {
                &self.binding
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

/// `id` / `inputs` / `outputs` de `TypedStage` leídos del binding.
macro_rules! binding_accessors {
    () => {
        fn id(&self) -> &str {
            &self.binding.id
        }

        fn inputs(&self) -> Vec<String> {
            self.binding.inputs.clone()
        }

        fn outputs(&self) -> Vec<String> {
            self.binding.outputs.clone()
        }
    };
}

mod circular_mask;
mod crop;
mod gamma_filter;
mod normalize;
mod reconstruct;
mod ring_removal;
mod rotation_center;
mod util;

pub use circular_mask::{CircularMaskParams, CircularMaskStage};
pub use crop::{CropParams, CropStage};
pub use gamma_filter::{GammaFilterParams, GammaFilterStage};
pub use normalize::{NormalizeParams, NormalizeStage};
pub use reconstruct::{ProjectionFilter, ReconstructParams, ReconstructStage};
pub use ring_removal::{RingRemovalParams, RingRemovalStage};
pub use rotation_center::{RotationCenterParams, RotationCenterStage};
