//! Model and environment loading.

mod environment;
mod loader;
pub(crate) mod model;
mod overrides;

pub use environment::{decode_environment_bytes, decode_environment_file, environment_from_image};
pub use loader::{AssetLoader, LoadScope, ModelDecoder, ModelRequest, PumpStats};
pub use model::{
    ModelData, ModelFormat, ModelNode, decode_model_bytes, decode_model_file, z_up_to_y_up,
};
pub use overrides::{MaterialOverride, MeshSelector};
