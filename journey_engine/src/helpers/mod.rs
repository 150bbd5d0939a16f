mod resource;

pub use resource::{extract_resource_id, normalize_event_type, resource_type_from_uri};
