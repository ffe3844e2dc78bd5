pub mod ecritures;
pub mod labels;
pub mod registry;
pub mod spreadsheet;

pub use ecritures::EcrituresService;
pub use labels::{LabelContext, LabelResolver, LabelSet, Localizable};
pub use registry::{EntityService, ListRequest, Page};
