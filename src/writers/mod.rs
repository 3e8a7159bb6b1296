use crate::core::types::{LinkShape, TableShape};

/// The per-field update strategy selected for a write. The
/// dispatch table below is a direct lookup, not virtual dispatch over
/// a class hierarchy: `dispatch` maps a field name plus its table
/// shape to exactly one `WriterKind`, and the Cache Controller holds
/// one match arm per kind implementing that kind's write protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterKind {
    /// Refuses writes outright (composite/size/path/formats-via-set_field/news).
    Dummy,
    Identifiers,
    Languages,
    Covers,
    Uuid,
    CustomSeriesIndex,
    Title,
    AuthorSort,
    ManyToOne,
    ManyToMany,
    OneToMany,
    OneToOne,
}

/// Select the writer for `field_name` given its table shape.
/// Order matters: name-based special cases are checked before the
/// generic shape fallback.
pub fn dispatch(field_name: &str, shape: TableShape) -> WriterKind {
    match field_name {
        "size" | "path" | "formats" | "news" => return WriterKind::Dummy,
        "identifiers" => return WriterKind::Identifiers,
        "languages" => return WriterKind::Languages,
        "cover" => return WriterKind::Covers,
        "uuid" => return WriterKind::Uuid,
        "title" => return WriterKind::Title,
        "author_sort" => return WriterKind::AuthorSort,
        _ => {}
    }
    if field_name.ends_with("_index") {
        return WriterKind::CustomSeriesIndex;
    }
    if shape == TableShape::Composite || shape == TableShape::Virtual {
        return WriterKind::Dummy;
    }
    match shape {
        TableShape::ManyToOne => WriterKind::ManyToOne,
        TableShape::ManyToMany => WriterKind::ManyToMany,
        TableShape::OneToMany => WriterKind::OneToMany,
        _ => WriterKind::OneToOne,
    }
}

/// The shared set of required steps any writer runs, in order.
/// The Cache Controller's write-api methods execute this sequence;
/// this enum exists so call sites and tests can name a step instead of
/// a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriteStep {
    Adapt,
    Preflight,
    Precheck,
    CasePropagation,
    StoreMutation,
    CacheMutation,
    SideEffects,
    Dirty,
}

pub const PROTOCOL: [WriteStep; 8] = [
    WriteStep::Adapt,
    WriteStep::Preflight,
    WriteStep::Precheck,
    WriteStep::CasePropagation,
    WriteStep::StoreMutation,
    WriteStep::CacheMutation,
    WriteStep::SideEffects,
    WriteStep::Dirty,
];

/// The link-shape-specific subroutine a `ManyToMany`/`ManyToOne`
/// writer's "Store mutation" step must run: break
/// obsolete links, repoint preserved links to retain their auxiliary
/// data, insert new links, then optionally clean up now-unused items.
pub fn link_update_style(shape: LinkShape) -> &'static str {
    match shape {
        LinkShape::Plain => "break/insert by set difference, no aux to preserve",
        LinkShape::Priority => "repoint preserving priority where the item is unchanged, renumber the rest",
        LinkShape::Typed => "break/insert by (item, type) set difference",
        LinkShape::TypedPriority => "repoint preserving (priority, type) where the item is unchanged",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_and_identifiers_are_special_cased() {
        assert_eq!(dispatch("title", TableShape::OneToOneInTitles), WriterKind::Title);
        assert_eq!(dispatch("identifiers", TableShape::ManyToMany), WriterKind::Identifiers);
    }

    #[test]
    fn custom_series_index_is_detected_by_suffix() {
        assert_eq!(dispatch("#myseries_index", TableShape::Virtual), WriterKind::CustomSeriesIndex);
    }

    #[test]
    fn shape_fallback_covers_generic_fields() {
        assert_eq!(dispatch("publisher", TableShape::ManyToOne), WriterKind::ManyToOne);
        assert_eq!(dispatch("tags", TableShape::ManyToMany), WriterKind::ManyToMany);
        assert_eq!(dispatch("comments", TableShape::OneToMany), WriterKind::OneToMany);
    }
}
