//! Pure compensation engines. Nothing here touches storage or the clock.

pub mod compression;
pub mod graph;
pub mod leadership;
pub mod pipeline;
pub mod placement;
pub mod stairstep;

pub use compression::{
    CompressedLine, CompressedMember, CompressionParams, CompressionResult, CompressionTraversal,
    LineDedup,
};
pub use graph::{GraphSnapshot, GraphView, RankEngine};
pub use leadership::{Eligibility, LeadershipBonusCalculator};
pub use pipeline::{CompensationEngine, SaleEffects, SaleError, VolumeDelta};
pub use placement::{BinaryPlacementEngine, CycleMatch, PlacementError, VolumeCredit};
pub use stairstep::{StairStepCalculator, StairStepParseError, StairStepTable};
