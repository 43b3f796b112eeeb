// HLS playlist handling: lossless line model, variant classification,
// reference relocation and fragment structure checks. No I/O.
pub mod attributes;
pub mod codec;
pub mod error;
pub mod label;
pub mod manifest;
pub mod probe;
pub mod reference;
pub mod rewrite;

// Export common types for ease of use
pub use attributes::{AttributeList, StreamInfo};
pub use codec::{Classification, CodecFamily, VariantClassifier};
pub use error::ManifestError;
pub use label::{rendition_label, variant_label};
pub use manifest::{
    FragmentEntry, Line, LineEnding, LineKind, Manifest, RenditionEntry, StreamKind, VariantEntry,
};
pub use probe::{SegmentKind, StructureError, check_structure};
pub use rewrite::{
    LocationAllocator, PathRewriter, RewrittenChild, RewrittenFragment, directory_name,
};
