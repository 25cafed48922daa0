//! Request translation settings.

/// How descriptor words matching no family are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DescriptorPolicy {
    /// Treat them as static buffers, as the hardware kernel does.
    #[default]
    Permissive,
    /// Reject the request with a malformed-buffer error.
    Strict,
}

/// Settings applied while translating a request.
///
/// Owned by the [`ServiceManager`](crate::ServiceManager) and copied into every
/// port it registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TranslateConfig {
    /// Unknown descriptor handling.
    pub descriptor_policy: DescriptorPolicy,
}

impl TranslateConfig {
    /// Configuration rejecting unknown descriptor patterns.
    pub const fn strict() -> Self {
        Self {
            descriptor_policy: DescriptorPolicy::Strict,
        }
    }
}
