//! Derived query descriptors (`findByUsernameAndAgeGreaterThan`).
//!
//! # Responsibility
//! - Split a method-name descriptor into subject, predicate parts and
//!   order suffix.
//! - Map PascalCase property tokens to schema paths while parsing, so a
//!   malformed descriptor never reaches the store.
//!
//! # Invariants
//! - Every descriptor error is a `SchemaMismatch` on the target entity.
//! - Parameters are positional, numbered in clause order from 1.

use crate::error::{RepoError, RepoResult};
use crate::model::schema::{EntitySchema, FieldPath, SchemaRegistry};
use crate::page::Direction;
use crate::query::compiled::{QueryDefinition, SelectionDef};
use crate::query::predicate::{property_path, Arg, ClauseDef, Comparator, Operand};
use once_cell::sync::Lazy;
use regex::Regex;

static DESCRIPTOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(find|read|get|query|count|exists)(\w*?)(?:By(\w*))?$")
        .expect("valid descriptor regex")
});
static LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(First|Top)(\d*)").expect("valid limit regex"));

/// Longest keywords first so `GreaterThanEqual` wins over `GreaterThan`.
const COMPARATOR_KEYWORDS: &[(&str, Comparator)] = &[
    ("GreaterThanEqual", Comparator::Ge),
    ("LessThanEqual", Comparator::Le),
    ("StartingWith", Comparator::StartingWith),
    ("GreaterThan", Comparator::Gt),
    ("EndingWith", Comparator::EndingWith),
    ("Containing", Comparator::Containing),
    ("IsNotNull", Comparator::IsNotNull),
    ("LessThan", Comparator::Lt),
    ("NotLike", Comparator::NotLike),
    ("NotNull", Comparator::IsNotNull),
    ("Between", Comparator::Between),
    ("IsNull", Comparator::IsNull),
    ("Equals", Comparator::Eq),
    ("NotIn", Comparator::NotIn),
    ("Like", Comparator::Like),
    ("Null", Comparator::IsNull),
    ("Not", Comparator::Ne),
    ("In", Comparator::In),
    ("Is", Comparator::Eq),
];

pub struct QueryDescriptor;

impl QueryDescriptor {
    /// Parses `method` into a query over `entity`.
    ///
    /// # Errors
    /// - `SchemaMismatch` for an unknown subject prefix, unsupported `Or`,
    ///   an empty property, an unknown property or a bad order suffix.
    pub fn parse(registry: &SchemaRegistry, entity: &str, method: &str) -> RepoResult<QueryDefinition> {
        let root = registry.get(entity)?;
        let mismatch = |message: String| RepoError::schema(root.name, format!("`{method}`: {message}"));

        let captures = DESCRIPTOR_RE
            .captures(method)
            .ok_or_else(|| mismatch("expected find|read|get|query|count|exists...By...".to_string()))?;
        let verb = captures.get(1).map_or("", |m| m.as_str());
        let subject = captures.get(2).map_or("", |m| m.as_str());
        let criteria = captures.get(3).map_or("", |m| m.as_str());

        let mut definition = QueryDefinition::new(method, entity);
        definition.selection = match verb {
            "count" => SelectionDef::Count(None),
            "exists" => SelectionDef::Exists,
            _ => SelectionDef::Entity,
        };
        if let Some(limit) = LIMIT_RE.captures(subject) {
            let digits = limit.get(2).map_or("", |m| m.as_str());
            let limit = if digits.is_empty() {
                1
            } else {
                digits
                    .parse::<usize>()
                    .map_err(|err| mismatch(format!("bad result limit `{digits}`: {err}")))?
            };
            if limit == 0 {
                return Err(mismatch("result limit must be positive".to_string()));
            }
            definition.limit = Some(limit);
        }

        let (predicate_part, order_part) = match criteria.find("OrderBy") {
            Some(index) => (&criteria[..index], Some(&criteria[index + "OrderBy".len()..])),
            None => (criteria, None),
        };

        if has_keyword(predicate_part, "Or") {
            return Err(mismatch("`Or` is not supported; split into separate queries".to_string()));
        }

        let mut position = 0;
        if !predicate_part.is_empty() {
            for part in split_keyword(predicate_part, "And") {
                if part.is_empty() {
                    return Err(mismatch("empty property between `And`s".to_string()));
                }
                let (path, op) = parse_part(registry, root, part).map_err(|_| {
                    mismatch(format!("no property of `{}` matches `{part}`", root.name))
                })?;
                let operand = match op.arity() {
                    0 => Operand::None,
                    1 => {
                        position += 1;
                        Operand::One(Arg::position(position))
                    }
                    _ => {
                        position += 2;
                        Operand::Two(Arg::position(position - 1), Arg::position(position))
                    }
                };
                definition.clauses.push(ClauseDef::new(path, op, operand));
            }
        }

        if let Some(order_part) = order_part {
            for (token, direction) in split_order(order_part).map_err(mismatch)? {
                let path = property_path(registry, root, token)
                    .map_err(|_| mismatch(format!("cannot order by unknown property `{token}`")))?;
                definition.order.push((path, direction));
            }
        }

        Ok(definition)
    }
}

/// Splits on `keyword` at camel-case boundaries: the keyword must follow a
/// lowercase letter or digit and precede an uppercase letter.
fn split_keyword<'a>(text: &'a str, keyword: &str) -> Vec<&'a str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut index = 1;
    while index + keyword.len() < bytes.len() {
        if is_boundary(bytes, index, keyword) {
            parts.push(&text[start..index]);
            start = index + keyword.len();
            index = start + 1;
        } else {
            index += 1;
        }
    }
    parts.push(&text[start..]);
    parts
}

fn has_keyword(text: &str, keyword: &str) -> bool {
    let bytes = text.as_bytes();
    (1..bytes.len().saturating_sub(keyword.len())).any(|index| is_boundary(bytes, index, keyword))
}

fn is_boundary(bytes: &[u8], index: usize, keyword: &str) -> bool {
    let end = index + keyword.len();
    end < bytes.len()
        && &bytes[index..end] == keyword.as_bytes()
        && !bytes[index - 1].is_ascii_uppercase()
        && bytes[end].is_ascii_uppercase()
}

/// Picks the longest comparator suffix whose remaining prefix is a known
/// property, falling back to the whole part as an equality property.
fn parse_part(
    registry: &SchemaRegistry,
    root: &'static EntitySchema,
    part: &str,
) -> RepoResult<(FieldPath, Comparator)> {
    for (keyword, op) in COMPARATOR_KEYWORDS {
        let Some(property) = part.strip_suffix(keyword) else {
            continue;
        };
        if property.is_empty() {
            continue;
        }
        if let Ok(path) = property_path(registry, root, property) {
            return Ok((path, *op));
        }
    }
    Ok((property_path(registry, root, part)?, Comparator::Eq))
}

fn split_order(text: &str) -> Result<Vec<(&str, Direction)>, String> {
    if text.is_empty() {
        return Err("`OrderBy` without a property".to_string());
    }
    let mut orders = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let next = ["Asc", "Desc"]
            .iter()
            .filter_map(|keyword| {
                rest.match_indices(keyword)
                    .find(|(index, _)| {
                        let end = index + keyword.len();
                        *index > 0
                            && rest
                                .as_bytes()
                                .get(end)
                                .map_or(true, |byte| byte.is_ascii_uppercase())
                    })
                    .map(|(index, _)| (index, *keyword))
            })
            .min_by_key(|(index, _)| *index);
        match next {
            Some((index, keyword)) => {
                let direction = if keyword == "Asc" {
                    Direction::Asc
                } else {
                    Direction::Desc
                };
                orders.push((&rest[..index], direction));
                rest = &rest[index + keyword.len()..];
            }
            None => {
                orders.push((rest, Direction::Asc));
                rest = "";
            }
        }
    }
    Ok(orders)
}
