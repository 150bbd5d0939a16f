use crate::db_types::ResourceType;

/// Infers the resource type from the path of a provider resource URL.
///
/// The path convention is fixed: `/transfers/` → transfer, `/customers/` → customer, `/funding-sources/` →
/// funding_source, `/accounts/` → account. Anything else is unknown.
pub fn resource_type_from_uri(uri: &str) -> ResourceType {
    if uri.contains("/transfers/") {
        ResourceType::Transfer
    } else if uri.contains("/customers/") {
        ResourceType::Customer
    } else if uri.contains("/funding-sources/") {
        ResourceType::FundingSource
    } else if uri.contains("/accounts/") {
        ResourceType::Account
    } else {
        ResourceType::Unknown
    }
}

/// Extracts the trailing resource identifier from a provider resource URL, e.g. `…/transfers/tr_123` → `tr_123`.
pub fn extract_resource_id(uri: &str) -> Option<String> {
    let re = regex::Regex::new(r"/(?:transfers|customers|funding-sources|accounts)/([A-Za-z0-9_\-]+)/?\s*$").unwrap();
    re.captures(uri).and_then(|c| c.get(1).map(|m| m.as_str().to_string()))
}

/// Normalizes a raw provider topic into the event type used for matching.
///
/// Topics of the form `customer_<rest>` with more than two underscore-delimited segments drop the leading
/// `customer` segment (`customer_bank_transfer_completed` → `bank_transfer_completed`). All other topics pass
/// through unchanged.
pub fn normalize_event_type(topic: &str) -> String {
    let segments = topic.split('_').count();
    match topic.strip_prefix("customer_") {
        Some(rest) if segments > 2 => rest.to_string(),
        _ => topic.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resource_types_from_paths() {
        assert_eq!(resource_type_from_uri("https://api.example.com/transfers/tr_1"), ResourceType::Transfer);
        assert_eq!(resource_type_from_uri("https://api.example.com/customers/cu_1"), ResourceType::Customer);
        assert_eq!(resource_type_from_uri("https://api.example.com/funding-sources/fs_1"), ResourceType::FundingSource);
        assert_eq!(resource_type_from_uri("https://api.example.com/accounts/ac_1"), ResourceType::Account);
        assert_eq!(resource_type_from_uri("https://api.example.com/widgets/w_1"), ResourceType::Unknown);
    }

    #[test]
    fn resource_ids_from_paths() {
        assert_eq!(extract_resource_id("https://api.example.com/transfers/tr_1").as_deref(), Some("tr_1"));
        assert_eq!(extract_resource_id("https://api.example.com/customers/cu-22/").as_deref(), Some("cu-22"));
        assert_eq!(extract_resource_id("https://api.example.com/widgets/w_1"), None);
        assert_eq!(extract_resource_id(""), None);
    }

    #[test]
    fn topic_normalization() {
        assert_eq!(normalize_event_type("customer_bank_transfer_completed"), "bank_transfer_completed");
        assert_eq!(normalize_event_type("customer_transfer_created"), "transfer_created");
        // Two segments keep the prefix
        assert_eq!(normalize_event_type("customer_created"), "customer_created");
        assert_eq!(normalize_event_type("transfer_completed"), "transfer_completed");
    }
}
