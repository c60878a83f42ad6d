pub mod appearance;
pub mod error;
pub mod filter;
pub mod index;
pub mod model;
pub mod parser;
pub mod profile;
pub mod prune;
pub mod verify;
pub mod writer;
pub mod zip_handler;

pub use error::{FilterError, ParseError};
pub use filter::{filter_gml_content, FilterOptions, FilteredGml};
pub use model::{Child, Document, Element, NodeId};
pub use profile::Profile;
pub use writer::GmlWriter;
pub use zip_handler::{ExtractSummary, OutputLayout, ZipHandler};
