//! Literal query strings: a small `select`/`update` language over entity
//! and relation names.
//!
//! # Responsibility
//! - Tokenize and parse query text into a `QueryDefinition` or an
//!   `UpdateDefinition`.
//! - Resolve identification variables (`m`, `t`) to root and relation
//!   paths so the compiled form is alias free.
//!
//! # Invariants
//! - Syntax errors are `InvalidQuery`; unknown names are left for schema
//!   compilation, which reports `SchemaMismatch`.
//!
//! Grammar (case-insensitive keywords):
//!
//! ```text
//! select  := SELECT items FROM Entity [alias] join* [WHERE conds] [ORDER BY order (',' order)*]
//! items   := alias | COUNT '(' (alias | path) ')' | NEW Name '(' path (',' path)* ')' | path (',' path)*
//! join    := [LEFT [OUTER] | INNER] JOIN [FETCH] alias '.' relation [[AS] alias]
//! conds   := cond (AND cond)*
//! cond    := path (op operand | IS [NOT] NULL | [NOT] IN operand | [NOT] LIKE operand
//!            | BETWEEN operand AND operand)
//! update  := UPDATE Entity [alias] SET assign (',' assign)* [WHERE conds]
//! assign  := path '=' (path ('+' | '-') operand | operand | NULL)
//! operand := :name | ?N | integer | 'text' | '(' literal (',' literal)* ')'
//! ```

use crate::error::{RepoError, RepoResult};
use crate::model::schema::FieldPath;
use crate::model::value::Value;
use crate::page::Direction;
use crate::query::compiled::{JoinDef, JoinKind, QueryDefinition, SelectionDef};
use crate::query::predicate::{Arg, ClauseDef, Comparator, Operand, ParamKey};
use crate::query::update::{AssignmentDef, MutationKind, UpdateDefinition};

const KEYWORDS: &[&str] = &[
    "select", "from", "where", "and", "or", "order", "by", "join", "left", "inner", "outer",
    "fetch", "as", "set", "update", "is", "not", "null", "in", "like", "between", "asc", "desc",
    "new", "count",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Param(ParamKey),
    Int(i64),
    Str(String),
    Symbol(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteralStatement {
    Select(QueryDefinition),
    Update(UpdateDefinition),
}

pub struct LiteralQuery;

impl LiteralQuery {
    pub fn parse(text: &str) -> RepoResult<LiteralStatement> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            text: text.trim(),
            tokens,
            pos: 0,
            root_alias: None,
            joins: Vec::new(),
        };
        let statement = if parser.eat_keyword("select") {
            LiteralStatement::Select(parser.select()?)
        } else if parser.eat_keyword("update") {
            LiteralStatement::Update(parser.update()?)
        } else {
            return Err(parser.error("expected `select` or `update`"));
        };
        if parser.pos < parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(statement)
    }

    pub fn parse_select(text: &str) -> RepoResult<QueryDefinition> {
        match Self::parse(text)? {
            LiteralStatement::Select(definition) => Ok(definition),
            LiteralStatement::Update(_) => Err(RepoError::invalid_query(
                text.trim(),
                "expected a select query, found an update",
            )),
        }
    }

    pub fn parse_update(text: &str) -> RepoResult<UpdateDefinition> {
        match Self::parse(text)? {
            LiteralStatement::Update(definition) => Ok(definition),
            LiteralStatement::Select(_) => Err(RepoError::invalid_query(
                text.trim(),
                "expected an update query, found a select",
            )),
        }
    }
}

fn tokenize(text: &str) -> RepoResult<Vec<Token>> {
    let chars = text.chars().collect::<Vec<_>>();
    let error = |message: String| RepoError::invalid_query(text.trim(), message);
    let mut tokens = Vec::new();
    let mut index = 0;
    while index < chars.len() {
        let ch = chars[index];
        if ch.is_whitespace() {
            index += 1;
            continue;
        }
        if ch.is_ascii_alphabetic() || ch == '_' {
            let start = index;
            while index < chars.len() && (chars[index].is_ascii_alphanumeric() || chars[index] == '_') {
                index += 1;
            }
            tokens.push(Token::Ident(chars[start..index].iter().collect()));
            continue;
        }
        if ch.is_ascii_digit() {
            let start = index;
            while index < chars.len() && chars[index].is_ascii_digit() {
                index += 1;
            }
            let digits = chars[start..index].iter().collect::<String>();
            let value = digits
                .parse::<i64>()
                .map_err(|err| error(format!("integer `{digits}` out of range: {err}")))?;
            tokens.push(Token::Int(value));
            continue;
        }
        match ch {
            ':' => {
                let start = index + 1;
                index = start;
                while index < chars.len() && (chars[index].is_ascii_alphanumeric() || chars[index] == '_') {
                    index += 1;
                }
                if index == start {
                    return Err(error("`:` must be followed by a parameter name".to_string()));
                }
                tokens.push(Token::Param(ParamKey::Named(chars[start..index].iter().collect())));
            }
            '?' => {
                let start = index + 1;
                index = start;
                while index < chars.len() && chars[index].is_ascii_digit() {
                    index += 1;
                }
                let digits = chars[start..index].iter().collect::<String>();
                let position = digits
                    .parse::<usize>()
                    .ok()
                    .filter(|position| *position > 0)
                    .ok_or_else(|| error("`?` must be followed by a position from 1".to_string()))?;
                tokens.push(Token::Param(ParamKey::Position(position)));
            }
            '\'' => {
                let mut value = String::new();
                index += 1;
                loop {
                    match chars.get(index) {
                        None => return Err(error("unterminated string literal".to_string())),
                        Some('\'') if chars.get(index + 1) == Some(&'\'') => {
                            value.push('\'');
                            index += 2;
                        }
                        Some('\'') => {
                            index += 1;
                            break;
                        }
                        Some(other) => {
                            value.push(*other);
                            index += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            _ => {
                let pair = chars.get(index + 1).map(|next| format!("{ch}{next}"));
                let symbol = match pair.as_deref() {
                    Some("<>") => Some("<>"),
                    Some("!=") => Some("<>"),
                    Some("<=") => Some("<="),
                    Some(">=") => Some(">="),
                    _ => None,
                };
                if let Some(symbol) = symbol {
                    tokens.push(Token::Symbol(symbol));
                    index += 2;
                    continue;
                }
                let symbol = match ch {
                    '=' => "=",
                    '<' => "<",
                    '>' => ">",
                    '(' => "(",
                    ')' => ")",
                    ',' => ",",
                    '.' => ".",
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    other => return Err(error(format!("unexpected character `{other}`"))),
                };
                tokens.push(Token::Symbol(symbol));
                index += 1;
            }
        }
    }
    Ok(tokens)
}

struct Parser<'t> {
    text: &'t str,
    tokens: Vec<Token>,
    pos: usize,
    root_alias: Option<String>,
    /// `(alias, relation)` pairs declared by joins.
    joins: Vec<(String, String)>,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> RepoError {
        let near = match self.tokens.get(self.pos) {
            Some(Token::Ident(ident)) => format!(" near `{ident}`"),
            Some(Token::Symbol(symbol)) => format!(" near `{symbol}`"),
            Some(_) => " near a literal".to_string(),
            None => " at end of input".to_string(),
        };
        RepoError::invalid_query(self.text, format!("{message}{near}"))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_keyword(&mut self, keyword: &str) -> RepoResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(&format!("expected `{keyword}`")))
        }
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(found)) if *found == symbol) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_symbol(&mut self, symbol: &str) -> RepoResult<()> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.error(&format!("expected `{symbol}`")))
        }
    }

    fn identifier(&mut self) -> RepoResult<String> {
        match self.peek() {
            Some(Token::Ident(ident)) if !is_keyword(ident) => {
                let ident = ident.clone();
                self.pos += 1;
                Ok(ident)
            }
            _ => Err(self.error("expected an identifier")),
        }
    }

    /// Optional identification variable after an entity or join path.
    fn optional_alias(&mut self) -> RepoResult<Option<String>> {
        if self.eat_keyword("as") {
            return self.identifier().map(Some);
        }
        match self.peek() {
            Some(Token::Ident(ident)) if !is_keyword(ident) => self.identifier().map(Some),
            _ => Ok(None),
        }
    }

    fn segments(&mut self) -> RepoResult<Vec<String>> {
        let mut segments = vec![self.identifier()?];
        while self.eat_symbol(".") {
            segments.push(self.identifier()?);
        }
        Ok(segments)
    }

    fn select(&mut self) -> RepoResult<QueryDefinition> {
        let items = self.select_items()?;
        self.expect_keyword("from")?;
        let entity = self.identifier()?;
        self.root_alias = self.optional_alias()?;

        let mut joins = Vec::new();
        loop {
            let kind = if self.eat_keyword("left") {
                self.eat_keyword("outer");
                self.expect_keyword("join")?;
                JoinKind::Left
            } else if self.eat_keyword("inner") {
                self.expect_keyword("join")?;
                JoinKind::Inner
            } else if self.eat_keyword("join") {
                JoinKind::Inner
            } else {
                break;
            };
            let fetch = self.eat_keyword("fetch");
            let segments = self.segments()?;
            let relation = match segments.as_slice() {
                [alias, relation] if self.is_root(alias) => relation.clone(),
                _ => return Err(self.error("join path must be `alias.relation` on the root entity")),
            };
            if let Some(alias) = self.optional_alias()? {
                self.joins.push((alias, relation.clone()));
            }
            joins.push(JoinDef {
                relation,
                kind,
                fetch,
            });
        }

        let selection = self.resolve_selection(items)?;
        let clauses = if self.eat_keyword("where") {
            self.conditions()?
        } else {
            Vec::new()
        };

        let mut order = Vec::new();
        if self.eat_keyword("order") {
            self.expect_keyword("by")?;
            loop {
                let segments = self.segments()?;
                let path = self.resolve_path(&segments)?;
                let direction = if self.eat_keyword("desc") {
                    Direction::Desc
                } else {
                    self.eat_keyword("asc");
                    Direction::Asc
                };
                order.push((path, direction));
                if !self.eat_symbol(",") {
                    break;
                }
            }
        }

        let mut definition = QueryDefinition::new(self.text, &entity).select(selection);
        definition.joins = joins;
        definition.clauses = clauses;
        definition.order = order;
        Ok(definition)
    }

    fn select_items(&mut self) -> RepoResult<SelectItems> {
        if self.eat_keyword("count") {
            self.expect_symbol("(")?;
            let target = if self.eat_symbol("*") {
                None
            } else {
                Some(self.segments()?)
            };
            self.expect_symbol(")")?;
            return Ok(SelectItems::Count(target));
        }
        if self.eat_keyword("new") {
            let constructor = self.segments()?;
            self.expect_symbol("(")?;
            let paths = self.segment_list()?;
            self.expect_symbol(")")?;
            let name = constructor.last().cloned().unwrap_or_default();
            return Ok(SelectItems::Paths(paths, Some(name)));
        }
        Ok(SelectItems::Paths(self.segment_list()?, None))
    }

    fn segment_list(&mut self) -> RepoResult<Vec<Vec<String>>> {
        let mut items = vec![self.segments()?];
        while self.eat_symbol(",") {
            items.push(self.segments()?);
        }
        Ok(items)
    }

    fn resolve_selection(&self, items: SelectItems) -> RepoResult<SelectionDef> {
        match items {
            SelectItems::Count(None) => Ok(SelectionDef::Count(None)),
            SelectItems::Count(Some(segments)) => match segments.as_slice() {
                [alias] if self.is_root(alias) => Ok(SelectionDef::Count(None)),
                _ => Ok(SelectionDef::Count(Some(self.resolve_path(&segments)?))),
            },
            SelectItems::Paths(paths, constructor) => match paths.as_slice() {
                [single] if constructor.is_none() && single.len() == 1 && self.is_root(&single[0]) => {
                    Ok(SelectionDef::Entity)
                }
                _ => Ok(SelectionDef::Paths {
                    paths: paths
                        .iter()
                        .map(|segments| self.resolve_path(segments))
                        .collect::<RepoResult<Vec<_>>>()?,
                    constructor,
                }),
            },
        }
    }

    fn is_root(&self, alias: &str) -> bool {
        self.root_alias.as_deref() == Some(alias)
    }

    fn resolve_path(&self, segments: &[String]) -> RepoResult<FieldPath> {
        match segments {
            [alias, field] if self.is_root(alias) => Ok(FieldPath::root(field.as_str())),
            [alias, relation, field] if self.is_root(alias) => {
                Ok(FieldPath::related(relation.as_str(), field.as_str()))
            }
            [alias, field] => match self.joins.iter().find(|(known, _)| known == alias) {
                Some((_, relation)) => Ok(FieldPath::related(relation.as_str(), field.as_str())),
                None if self.root_alias.is_none() => {
                    Ok(FieldPath::related(alias.as_str(), field.as_str()))
                }
                None => Err(RepoError::invalid_query(
                    self.text,
                    format!("unknown identification variable `{alias}`"),
                )),
            },
            [field] if self.root_alias.is_none() => Ok(FieldPath::root(field.as_str())),
            _ => Err(RepoError::invalid_query(
                self.text,
                format!("cannot resolve path `{}`", segments.join(".")),
            )),
        }
    }

    fn conditions(&mut self) -> RepoResult<Vec<ClauseDef>> {
        let mut clauses = vec![self.condition()?];
        while self.eat_keyword("and") {
            clauses.push(self.condition()?);
        }
        if self.peek_keyword("or") {
            return Err(self.error("`or` is not supported"));
        }
        Ok(clauses)
    }

    fn condition(&mut self) -> RepoResult<ClauseDef> {
        let segments = self.segments()?;
        let path = self.resolve_path(&segments)?;

        if self.eat_keyword("is") {
            let op = if self.eat_keyword("not") {
                Comparator::IsNotNull
            } else {
                Comparator::IsNull
            };
            self.expect_keyword("null")?;
            return Ok(ClauseDef::new(path, op, Operand::None));
        }
        if self.eat_keyword("between") {
            let low = self.operand()?;
            self.expect_keyword("and")?;
            let high = self.operand()?;
            return Ok(ClauseDef::new(path, Comparator::Between, Operand::Two(low, high)));
        }
        let negated = self.eat_keyword("not");
        if self.eat_keyword("in") {
            let op = if negated { Comparator::NotIn } else { Comparator::In };
            return Ok(ClauseDef::new(path, op, Operand::One(self.operand()?)));
        }
        if self.eat_keyword("like") {
            let op = if negated {
                Comparator::NotLike
            } else {
                Comparator::Like
            };
            return Ok(ClauseDef::new(path, op, Operand::One(self.operand()?)));
        }
        if negated {
            return Err(self.error("expected `in` or `like` after `not`"));
        }

        let op = match self.peek() {
            Some(Token::Symbol("=")) => Comparator::Eq,
            Some(Token::Symbol("<>")) => Comparator::Ne,
            Some(Token::Symbol("<")) => Comparator::Lt,
            Some(Token::Symbol("<=")) => Comparator::Le,
            Some(Token::Symbol(">")) => Comparator::Gt,
            Some(Token::Symbol(">=")) => Comparator::Ge,
            _ => return Err(self.error("expected a comparison operator")),
        };
        self.pos += 1;
        Ok(ClauseDef::new(path, op, Operand::One(self.operand()?)))
    }

    fn operand(&mut self) -> RepoResult<Arg> {
        if self.eat_symbol("(") {
            let mut values = vec![self.literal()?];
            while self.eat_symbol(",") {
                values.push(self.literal()?);
            }
            self.expect_symbol(")")?;
            return Ok(Arg::Literal(Value::List(values)));
        }
        if let Some(Token::Param(key)) = self.peek() {
            let key = key.clone();
            self.pos += 1;
            return Ok(Arg::Param(key));
        }
        self.literal().map(Arg::Literal)
    }

    fn literal(&mut self) -> RepoResult<Value> {
        let negative = self.eat_symbol("-");
        let value = match self.peek() {
            Some(Token::Int(value)) => Value::Integer(if negative { -*value } else { *value }),
            Some(Token::Str(value)) if !negative => Value::Text(value.clone()),
            Some(Token::Ident(ident)) if !negative && ident.eq_ignore_ascii_case("null") => {
                Value::Null
            }
            _ => return Err(self.error("expected a parameter or literal")),
        };
        self.pos += 1;
        Ok(value)
    }

    fn update(&mut self) -> RepoResult<UpdateDefinition> {
        let entity = self.identifier()?;
        self.root_alias = self.optional_alias()?;
        self.expect_keyword("set")?;

        let mut assignments = Vec::new();
        loop {
            let segments = self.segments()?;
            let path = self.resolve_path(&segments)?;
            self.expect_symbol("=")?;
            assignments.push(self.assignment(path)?);
            if !self.eat_symbol(",") {
                break;
            }
        }

        let clauses = if self.eat_keyword("where") {
            self.conditions()?
        } else {
            Vec::new()
        };
        Ok(UpdateDefinition {
            name: self.text.to_string(),
            entity,
            assignments,
            clauses,
        })
    }

    fn assignment(&mut self, target: FieldPath) -> RepoResult<AssignmentDef> {
        let starts_with_path = matches!(self.peek(), Some(Token::Ident(ident)) if !is_keyword(ident));
        if starts_with_path {
            let segments = self.segments()?;
            let source = self.resolve_path(&segments)?;
            if source != target {
                return Err(self.error(&format!(
                    "`{target}` can only be computed from itself, found `{source}`"
                )));
            }
            let kind = if self.eat_symbol("+") {
                MutationKind::Add
            } else if self.eat_symbol("-") {
                MutationKind::Subtract
            } else {
                return Err(self.error("expected `+` or `-`"));
            };
            return Ok(AssignmentDef {
                path: target,
                kind,
                arg: self.operand()?,
            });
        }
        Ok(AssignmentDef {
            path: target,
            kind: MutationKind::Set,
            arg: self.operand()?,
        })
    }
}

enum SelectItems {
    Count(Option<Vec<String>>),
    Paths(Vec<Vec<String>>, Option<String>),
}

fn is_keyword(ident: &str) -> bool {
    KEYWORDS
        .iter()
        .any(|keyword| keyword.eq_ignore_ascii_case(ident))
}

#[cfg(test)]
mod tests {
    use super::{LiteralQuery, LiteralStatement};
    use crate::error::RepoError;
    use crate::model::schema::FieldPath;
    use crate::model::value::Value;
    use crate::query::compiled::{JoinKind, SelectionDef};
    use crate::query::predicate::{Arg, Comparator, Operand};
    use crate::query::update::MutationKind;

    #[test]
    fn select_with_named_parameters() {
        let definition = LiteralQuery::parse_select(
            "select m from Member m where m.username = :username and m.age = :age",
        )
        .unwrap();
        assert_eq!(definition.entity, "Member");
        assert_eq!(definition.selection, SelectionDef::Entity);
        assert_eq!(definition.clauses.len(), 2);
        assert_eq!(definition.clauses[1].operand, Operand::One(Arg::named("age")));
    }

    #[test]
    fn constructor_expression_over_join_alias() {
        let definition = LiteralQuery::parse_select(
            "select new study.MemberDto(m.id, m.username, t.name) from Member m join m.team t",
        )
        .unwrap();
        assert_eq!(
            definition.selection,
            SelectionDef::Paths {
                paths: vec![
                    FieldPath::root("id"),
                    FieldPath::root("username"),
                    FieldPath::related("team", "name"),
                ],
                constructor: Some("MemberDto".to_string()),
            }
        );
        assert_eq!(definition.joins[0].kind, JoinKind::Inner);
    }

    #[test]
    fn fetch_join_count_and_in() {
        let fetch = LiteralQuery::parse_select("select m from Member m left join fetch m.team").unwrap();
        assert!(fetch.joins[0].fetch);
        assert_eq!(fetch.joins[0].kind, JoinKind::Left);

        let count = LiteralQuery::parse_select("select count(m.username) from Member m").unwrap();
        assert_eq!(count.selection, SelectionDef::Count(Some(FieldPath::root("username"))));

        let names =
            LiteralQuery::parse_select("select m from Member m where m.username in :names").unwrap();
        assert_eq!(names.clauses[0].op, Comparator::In);

        let literal_list = LiteralQuery::parse_select(
            "select m from Member m where m.age not in (10, -2) order by m.username desc",
        )
        .unwrap();
        assert_eq!(
            literal_list.clauses[0].operand,
            Operand::One(Arg::Literal(Value::List(vec![Value::from(10), Value::from(-2)])))
        );
        assert_eq!(literal_list.order.len(), 1);
    }

    #[test]
    fn bulk_update_statement() {
        let statement =
            LiteralQuery::parse("update Member m set m.age = m.age + 1 where m.age >= :age").unwrap();
        let LiteralStatement::Update(update) = statement else {
            panic!("expected update");
        };
        assert_eq!(update.assignments[0].kind, MutationKind::Add);
        assert_eq!(update.assignments[0].arg, Arg::literal(1));
        assert_eq!(update.clauses[0].op, Comparator::Ge);
    }

    #[test]
    fn syntax_errors_are_invalid_query() {
        for text in [
            "select m from",
            "delete from Member m",
            "select m from Member m where m.age >",
            "select m from Member m where m.age = 1 or m.age = 2",
            "select m from Member m where x.age = 1",
            "select m from Member m where m.username = 'open",
            "update Member m set m.age = m.username + 1",
        ] {
            let err = LiteralQuery::parse(text).unwrap_err();
            assert!(matches!(err, RepoError::InvalidQuery { .. }), "{text} gave {err:?}");
        }
    }
}
