/// Extract just the resource name from either "name" or "kind/name" format
///
/// This helper allows methods to accept both formats for consistency:
/// - `"tcp-echo"` → `"tcp-echo"`
/// - `"job/tcp-echo"` → `"tcp-echo"`
/// - `"service/tcp-go-echo"` → `"tcp-go-echo"`
#[must_use]
pub fn extract_resource_name(reference: &str) -> &str {
    reference.split('/').next_back().unwrap_or(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_resource_name() {
        assert_eq!(extract_resource_name("tcp-echo"), "tcp-echo");
        assert_eq!(extract_resource_name("job/tcp-echo"), "tcp-echo");
        assert_eq!(extract_resource_name("service/tcp-go-echo"), "tcp-go-echo");

        // Edge cases
        assert_eq!(extract_resource_name(""), "");
        assert_eq!(extract_resource_name("a/b/c"), "c");
    }
}
