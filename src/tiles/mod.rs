//! Streamed terrain tiles.
//!
//! [`TilesRenderer`] wraps any [`TileStream`] with a plugin chain and keeps
//! the stream's resident tiles in the scene graph. LOD selection and
//! fetching stay inside the stream.

mod plugins;
mod procedural;
mod renderer;
mod stream;

pub use plugins::{
    CreasedNormalsPlugin, IonAuthPlugin, MaterialReplacementPlugin, MeshDecompressionPlugin,
    ReorientationPlugin, TileCompressionPlugin, TileFade, TilesFadePlugin, TilesFrame,
    TilesPlugin, UpdateOnChangePlugin,
};
pub use procedural::ProceduralTerrainStream;
pub use renderer::{TilesRenderer, TilesStats};
pub use stream::{
    EncodedMesh, TileContent, TileEvent, TileGeometry, TileKey, TileRequest, TileStream,
    ViewState,
};
