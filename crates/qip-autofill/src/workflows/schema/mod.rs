//! Schema-driven payload generation: option catalog, value resolution, calculated fields.

mod calculate;
pub mod domain;
pub mod generators;
mod media;
mod options;
mod overrides;
mod payload;
mod resolver;

pub use calculate::evaluate;
pub use domain::{
    CalculationStep, FieldSchema, OptionItem, PayloadEntry, ResolutionContext, ResolutionScope,
    StepDetail,
};
pub use media::{MediaError, MediaFolder, MediaLibrary};
pub use options::OptionCatalog;
pub use overrides::{OverrideProvider, OverrideRegistry, OverrideTable, OverrideValue, UploadKind};
pub use payload::{build_payload, save_body};
pub use resolver::{rule_names, FieldValueResolver, UploadError, ValueResolver};
