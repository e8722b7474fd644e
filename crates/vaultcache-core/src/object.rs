//! Stable type tags for the object layer.
//!
//! `stable_name_of(T)` must be deterministic across process restarts and
//! independent of irrelevant surface-syntax changes. Rust has no stable
//! `std::any::type_name` guarantee across compiler versions, so rather than
//! derive the tag via reflection, object-layer types opt in explicitly by
//! implementing this trait and declaring their own tag.
pub trait CacheObject {
    /// The stable, opaque identifier stored in `TypeName`. Two unrelated
    /// types sharing a tag is a program bug the engine does not detect.
    const TYPE_TAG: &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;

    impl CacheObject for Widget {
        const TYPE_TAG: &'static str = "widget";
    }

    #[test]
    fn tag_is_accessible_as_a_const() {
        assert_eq!(Widget::TYPE_TAG, "widget");
    }
}
