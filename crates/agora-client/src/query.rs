//! Backend-agnostic query description and its PostgREST rendering.

use std::fmt::{self, Display, Formatter};

/// Tables and views the client reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// Community rows.
    Communities,
    /// Membership rows `(community_id, user_id)`.
    CommunityMembers,
    /// Post rows.
    Posts,
    /// Media attached to posts.
    PostMedia,
    /// Reactions keyed by `(post_id, user_id)`.
    PostReactions,
    /// Organization accounts.
    Organizations,
    /// User profiles.
    Profiles,
    /// Post topics.
    Topics,
    /// Marketplace transactions.
    Transactions,
    /// Price offers.
    Offers,
    /// Marketplace listings.
    Listings,
}

impl Table {
    /// Every table, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Communities,
        Self::CommunityMembers,
        Self::Posts,
        Self::PostMedia,
        Self::PostReactions,
        Self::Organizations,
        Self::Profiles,
        Self::Topics,
        Self::Transactions,
        Self::Offers,
        Self::Listings,
    ];

    /// Backend table name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Communities => "communities",
            Self::CommunityMembers => "community_members",
            Self::Posts => "posts",
            Self::PostMedia => "post_media",
            Self::PostReactions => "post_reactions",
            Self::Organizations => "organizations",
            Self::Profiles => "profiles",
            Self::Topics => "topics",
            Self::Transactions => "transactions",
            Self::Offers => "offers",
            Self::Listings => "listings",
        }
    }
}

impl Display for Table {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Row predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `column = value`.
    Eq {
        /// Column name.
        column: &'static str,
        /// Compared value in its text form.
        value: String,
    },
    /// `column <> value`.
    Neq {
        /// Column name.
        column: &'static str,
        /// Compared value in its text form.
        value: String,
    },
    /// `column IN (values)`.
    In {
        /// Column name.
        column: &'static str,
        /// Accepted values.
        values: Vec<String>,
    },
    /// `column IS NULL`.
    IsNull {
        /// Column name.
        column: &'static str,
    },
    /// `column IS NOT NULL`.
    NotNull {
        /// Column name.
        column: &'static str,
    },
    /// Case-insensitive pattern match; `*` is the wildcard.
    ILike {
        /// Column name.
        column: &'static str,
        /// Pattern with `*` wildcards.
        pattern: String,
    },
    /// Disjunction of the nested filters.
    AnyOf(Vec<Self>),
}

impl Filter {
    /// `column = value`.
    pub fn equals(column: &'static str, value: impl ToString) -> Self {
        Self::Eq {
            column,
            value: value.to_string(),
        }
    }

    /// `column <> value`.
    pub fn not_equals(column: &'static str, value: impl ToString) -> Self {
        Self::Neq {
            column,
            value: value.to_string(),
        }
    }

    /// `column IN (values)`.
    pub fn is_in<I, V>(column: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        Self::In {
            column,
            values: values.into_iter().map(|value| value.to_string()).collect(),
        }
    }

    /// Case-insensitive substring match.
    #[must_use]
    pub fn contains(column: &'static str, term: &str) -> Self {
        let cleaned: String = term.chars().filter(|ch| *ch != '*').collect();
        Self::ILike {
            column,
            pattern: format!("*{cleaned}*"),
        }
    }

    /// Render as a PostgREST query pair.
    #[must_use]
    pub fn to_pair(&self) -> (String, String) {
        match self {
            Self::AnyOf(filters) => ("or".to_string(), format!("({})", or_terms(filters))),
            other => (
                other.column().unwrap_or_default().to_string(),
                other.operand(),
            ),
        }
    }

    /// Column this filter constrains; `None` for disjunctions.
    #[must_use]
    pub const fn column(&self) -> Option<&'static str> {
        match self {
            Self::Eq { column, .. }
            | Self::Neq { column, .. }
            | Self::In { column, .. }
            | Self::IsNull { column }
            | Self::NotNull { column }
            | Self::ILike { column, .. } => Some(column),
            Self::AnyOf(_) => None,
        }
    }

    fn operand(&self) -> String {
        match self {
            Self::Eq { value, .. } => format!("eq.{value}"),
            Self::Neq { value, .. } => format!("neq.{value}"),
            Self::In { values, .. } => {
                let quoted: Vec<String> = values.iter().map(|value| quote(value)).collect();
                format!("in.({})", quoted.join(","))
            }
            Self::IsNull { .. } => "is.null".to_string(),
            Self::NotNull { .. } => "not.is.null".to_string(),
            Self::ILike { pattern, .. } => format!("ilike.{pattern}"),
            Self::AnyOf(filters) => format!("or({})", or_terms(filters)),
        }
    }

    fn or_term(&self) -> String {
        match self {
            Self::AnyOf(_) => self.operand(),
            other => format!(
                "{}.{}",
                other.column().unwrap_or_default(),
                quote_operand(&other.operand())
            ),
        }
    }
}

fn or_terms(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(Filter::or_term)
        .collect::<Vec<_>>()
        .join(",")
}

fn needs_quotes(value: &str) -> bool {
    value
        .chars()
        .any(|ch| matches!(ch, ',' | '(' | ')' | '"' | ':'))
}

fn quote(value: &str) -> String {
    if needs_quotes(value) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

// Inside `or=(...)` a comma in an eq/ilike operand would split the term.
fn quote_operand(operand: &str) -> String {
    match operand.split_once('.') {
        Some((op, value)) if matches!(op, "eq" | "neq" | "ilike") && needs_quotes(value) => {
            format!("{op}.{}", quote(value))
        }
        _ => operand.to_string(),
    }
}

/// Sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    /// Column to sort by.
    pub column: &'static str,
    /// Ascending when true.
    pub ascending: bool,
}

impl Order {
    /// Ascending order on `column`.
    #[must_use]
    pub const fn asc(column: &'static str) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    /// Descending order on `column`.
    #[must_use]
    pub const fn desc(column: &'static str) -> Self {
        Self {
            column,
            ascending: false,
        }
    }
}

/// Window over the ordered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// Rows to skip.
    pub offset: u64,
    /// Maximum rows to return.
    pub limit: u32,
}

/// A read against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    /// Table to read.
    pub table: Table,
    /// Column list (`*` by default).
    pub columns: String,
    /// Conjunction of predicates.
    pub filters: Vec<Filter>,
    /// Sort keys, most significant first.
    pub order: Vec<Order>,
    /// Optional window.
    pub range: Option<Range>,
}

impl SelectQuery {
    /// Select every column of `table`.
    #[must_use]
    pub fn new(table: Table) -> Self {
        Self {
            table,
            columns: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            range: None,
        }
    }

    /// Restrict the column list.
    #[must_use]
    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    /// Add a predicate.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add a predicate when present.
    #[must_use]
    pub fn filter_opt(self, filter: Option<Filter>) -> Self {
        match filter {
            Some(filter) => self.filter(filter),
            None => self,
        }
    }

    /// Append a sort key.
    #[must_use]
    pub fn order(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    /// Read `limit` rows starting at `offset`.
    #[must_use]
    pub const fn range(mut self, offset: u64, limit: u32) -> Self {
        self.range = Some(Range { offset, limit });
        self
    }

    /// Read at most `limit` rows.
    #[must_use]
    pub const fn limit(self, limit: u32) -> Self {
        self.range(0, limit)
    }

    /// Render as PostgREST query pairs.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), self.columns.clone())];
        pairs.extend(self.filters.iter().map(Filter::to_pair));
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|key| {
                    format!(
                        "{}.{}",
                        key.column,
                        if key.ascending { "asc" } else { "desc" }
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("order".to_string(), order));
        }
        if let Some(range) = self.range {
            pairs.push(("offset".to_string(), range.offset.to_string()));
            pairs.push(("limit".to_string(), range.limit.to_string()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn pair(key: &str, value: &str) -> (String, String) {
        (key.to_string(), value.to_string())
    }

    #[test]
    fn renders_filters_order_and_range() {
        let community = Uuid::nil();
        let query = SelectQuery::new(Table::Posts)
            .filter(Filter::equals("community_id", community))
            .filter(Filter::NotNull { column: "region" })
            .filter(Filter::contains("content", "rust*"))
            .order(Order::desc("created_at"))
            .order(Order::desc("id"))
            .range(40, 20);
        assert_eq!(
            query.to_pairs(),
            vec![
                pair("select", "*"),
                pair("community_id", &format!("eq.{community}")),
                pair("region", "not.is.null"),
                pair("content", "ilike.*rust*"),
                pair("order", "created_at.desc,id.desc"),
                pair("offset", "40"),
                pair("limit", "20"),
            ]
        );
    }

    #[test]
    fn in_lists_quote_reserved_characters() {
        let filter = Filter::is_in("region", ["north", "south,east"]);
        assert_eq!(
            filter.to_pair(),
            pair("region", "in.(north,\"south,east\")")
        );
        assert_eq!(
            Filter::IsNull {
                column: "expires_at"
            }
            .to_pair(),
            pair("expires_at", "is.null")
        );
    }

    #[test]
    fn disjunctions_render_as_or_groups() {
        let user = Uuid::nil();
        let filter = Filter::AnyOf(vec![
            Filter::equals("buyer_id", user),
            Filter::equals("seller_id", user),
        ]);
        assert_eq!(
            filter.to_pair(),
            pair("or", &format!("(buyer_id.eq.{user},seller_id.eq.{user})"))
        );
        assert_eq!(filter.column(), None);
    }

    #[test]
    fn table_names_are_unique() {
        let mut names: Vec<&str> = Table::ALL.iter().map(|table| table.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Table::ALL.len());
        assert_eq!(Table::PostReactions.to_string(), "post_reactions");
    }
}
