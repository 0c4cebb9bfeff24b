use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::{Directive, SchemaError, SchemaUpdate};
use crate::tok;
use crate::types::TypeId;

#[derive(Default)]
struct Seen {
    tokenizers: FxHashSet<&'static str>,
    sortable: bool,
}

/// Fills in default tokenizers and rejects invalid index declarations.
///
/// Validation stops at the first failure. Tokenizer uniqueness and the
/// single-sortable rule apply per predicate across the whole batch, so two
/// declarations of the same predicate are checked together. Running this on
/// its own output changes nothing.
pub fn enrich_schema(updates: &mut [SchemaUpdate]) -> Result<(), SchemaError> {
    let mut seen: FxHashMap<String, Seen> = FxHashMap::default();
    for update in updates.iter_mut() {
        if update.value_type == TypeId::Uid {
            continue;
        }
        if update.tokenizers.is_empty() && update.directive == Directive::Index {
            let default = tok::default_tokenizer(update.value_type);
            debug!(
                predicate = %update.predicate,
                tokenizer = default.name(),
                "assigning default tokenizer"
            );
            update.tokenizers = vec![default.name().to_string()];
        } else if !update.tokenizers.is_empty() && update.directive != Directive::Index {
            return Err(SchemaError::TokenizerWithoutIndex {
                predicate: update.predicate.clone(),
            });
        }

        let entry = seen.entry(update.predicate.clone()).or_default();
        for name in &update.tokenizers {
            let tokenizer = tok::lookup(name).ok_or_else(|| SchemaError::UnknownTokenizer {
                name: name.clone(),
            })?;
            if tokenizer.value_type() != update.value_type.index_type() {
                return Err(SchemaError::TokenizerTypeMismatch {
                    tokenizer: tokenizer.name().to_string(),
                    predicate: update.predicate.clone(),
                    value_type: update.value_type,
                });
            }
            if !entry.tokenizers.insert(tokenizer.name()) {
                return Err(SchemaError::DuplicateTokenizer {
                    predicate: update.predicate.clone(),
                });
            }
            if tokenizer.is_sortable() {
                if entry.sortable {
                    return Err(SchemaError::MultipleSortable {
                        predicate: update.predicate.clone(),
                    });
                }
                entry.sortable = true;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema;

    #[test]
    fn index_without_tokenizer_gets_default() {
        let mut updates = parse_schema("age: int @index .").unwrap();
        enrich_schema(&mut updates).unwrap();
        assert_eq!(updates[0].tokenizers, vec!["int".to_string()]);
    }

    #[test]
    fn declared_tokenizer_is_kept() {
        let mut updates = parse_schema("age: int @index(int) .").unwrap();
        enrich_schema(&mut updates).unwrap();
        assert_eq!(updates[0].tokenizers, vec!["int".to_string()]);
        assert_eq!(updates[0].directive, Directive::Index);
    }

    #[test]
    fn enrichment_is_idempotent() {
        let mut updates = parse_schema(
            "name: string @index .\nage: int @index .\nfriend: uid @reverse .\nborn: datetime .",
        )
        .unwrap();
        enrich_schema(&mut updates).unwrap();
        let once = updates.clone();
        enrich_schema(&mut updates).unwrap();
        assert_eq!(once, updates);
    }

    #[test]
    fn tokenizers_require_index_directive() {
        let mut updates = vec![SchemaUpdate {
            tokenizers: vec!["term".into()],
            ..SchemaUpdate::new("name", TypeId::String)
        }];
        assert_eq!(
            enrich_schema(&mut updates),
            Err(SchemaError::TokenizerWithoutIndex {
                predicate: "name".into()
            })
        );
    }

    #[test]
    fn unknown_and_mismatched_tokenizers_fail() {
        let mut updates = vec![SchemaUpdate::new("name", TypeId::String).indexed(&["geo"])];
        assert_eq!(
            enrich_schema(&mut updates),
            Err(SchemaError::UnknownTokenizer { name: "geo".into() })
        );

        let mut updates = vec![SchemaUpdate::new("age", TypeId::Int).indexed(&["term"])];
        assert!(matches!(
            enrich_schema(&mut updates),
            Err(SchemaError::TokenizerTypeMismatch { .. })
        ));
    }

    #[test]
    fn duplicate_tokenizers_fail() {
        let mut updates = vec![SchemaUpdate::new("name", TypeId::String).indexed(&["term", "term"])];
        assert_eq!(
            enrich_schema(&mut updates),
            Err(SchemaError::DuplicateTokenizer {
                predicate: "name".into()
            })
        );
    }

    #[test]
    fn sortable_tokenizers_across_declarations_fail() {
        let mut updates = vec![
            SchemaUpdate::new("p", TypeId::DateTime).indexed(&["year"]),
            SchemaUpdate::new("p", TypeId::DateTime).indexed(&["month"]),
        ];
        let err = enrich_schema(&mut updates).unwrap_err();
        assert_eq!(err, SchemaError::MultipleSortable { predicate: "p".into() });
        assert!(err.to_string().contains("more than one sortable index"));
    }

    #[test]
    fn uid_predicates_skip_tokenizer_checks() {
        let mut updates = vec![SchemaUpdate::new("friend", TypeId::Uid).indexed(&["nonsense"])];
        enrich_schema(&mut updates).unwrap();
        assert_eq!(updates[0].tokenizers, vec!["nonsense".to_string()]);
    }

    #[test]
    fn untyped_predicates_index_as_strings() {
        let mut updates = vec![SchemaUpdate::new("note", TypeId::Default).indexed(&[])];
        enrich_schema(&mut updates).unwrap();
        assert_eq!(updates[0].tokenizers, vec!["term".to_string()]);
    }
}
