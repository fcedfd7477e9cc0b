//! Column-oriented survey data frame.
//!
//! A [`SurveyFrame`] holds one survey table (interviews, instantaneous
//! counts, or the sampling calendar) as typed columns in insertion order.
//! Missing values are explicit: every cell is an `Option`.

use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use indexmap::IndexMap;

use crate::error::{CreelError, Result};

/// A single typed column of survey data.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Counts, hours, weights, lengths.
    Numeric(Vec<Option<f64>>),
    /// Site names, species codes, angler types.
    Text(Vec<Option<String>>),
    /// Survey dates.
    Date(Vec<Option<NaiveDate>>),
    /// Count or interview clock times.
    Time(Vec<Option<NaiveTime>>),
    /// Yes/no fields such as trip-completion flags.
    Flag(Vec<Option<bool>>),
}

impl Column {
    /// Number of cells in the column, missing values included.
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Text(v) => v.len(),
            Column::Date(v) => v.len(),
            Column::Time(v) => v.len(),
            Column::Flag(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Numeric(_) => "numeric",
            Column::Text(_) => "text",
            Column::Date(_) => "date",
            Column::Time(_) => "time",
            Column::Flag(_) => "flag",
        }
    }

    /// Number of missing cells.
    pub fn null_count(&self) -> usize {
        match self {
            Column::Numeric(v) => v.iter().filter(|c| c.is_none()).count(),
            Column::Text(v) => v.iter().filter(|c| c.is_none()).count(),
            Column::Date(v) => v.iter().filter(|c| c.is_none()).count(),
            Column::Time(v) => v.iter().filter(|c| c.is_none()).count(),
            Column::Flag(v) => v.iter().filter(|c| c.is_none()).count(),
        }
    }

    /// Renders one cell as a key string, or `None` for a missing cell.
    ///
    /// Dates render as ISO `YYYY-MM-DD`, times as `HH:MM:SS`, numbers via
    /// their shortest display form, so equal values always produce equal
    /// key strings.
    pub(crate) fn render(&self, row: usize) -> Option<String> {
        match self {
            Column::Numeric(v) => v.get(row).copied().flatten().map(|x| x.to_string()),
            Column::Text(v) => v.get(row).cloned().flatten(),
            Column::Date(v) => v.get(row).copied().flatten().map(|d| d.to_string()),
            Column::Time(v) => v.get(row).copied().flatten().map(|t| t.to_string()),
            Column::Flag(v) => v.get(row).copied().flatten().map(|b| b.to_string()),
        }
    }
}

/// Combined value of the stratification columns for one group of rows.
///
/// Keys compare and hash by their rendered string values, one entry per
/// stratification column, in the order the columns were requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StratumKey(Vec<String>);

impl StratumKey {
    pub(crate) fn new(values: Vec<String>) -> Self {
        StratumKey(values)
    }

    /// Rendered key values, one per stratification column.
    pub fn values(&self) -> &[String] {
        &self.0
    }

    /// Pairs key values with their column names.
    pub fn labeled(&self, columns: &[String]) -> IndexMap<String, String> {
        columns
            .iter()
            .cloned()
            .zip(self.0.iter().cloned())
            .collect()
    }
}

impl fmt::Display for StratumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" / "))
    }
}

/// Placeholder key value for rows where a stratification cell is missing.
pub(crate) const NULL_KEY: &str = "NA";

/// An immutable, column-oriented table of survey rows.
#[derive(Debug, Clone)]
pub struct SurveyFrame {
    columns: IndexMap<String, Column>,
    len: usize,
}

impl SurveyFrame {
    /// Starts building a frame column by column.
    pub fn builder() -> FrameBuilder {
        FrameBuilder::default()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns.get(name).ok_or_else(|| {
            CreelError::missing_column(name, "check the column names of the input table")
        })
    }

    /// Numeric column accessor; errors if the column is absent or not numeric.
    pub fn numeric(&self, name: &str) -> Result<&[Option<f64>]> {
        match self.column(name)? {
            Column::Numeric(v) => Ok(v),
            other => Err(CreelError::ColumnType {
                column: name.to_string(),
                expected: "numeric",
                found: other.type_name(),
            }),
        }
    }

    /// Text column accessor.
    pub fn text(&self, name: &str) -> Result<&[Option<String>]> {
        match self.column(name)? {
            Column::Text(v) => Ok(v),
            other => Err(CreelError::ColumnType {
                column: name.to_string(),
                expected: "text",
                found: other.type_name(),
            }),
        }
    }

    /// Date column accessor.
    pub fn date(&self, name: &str) -> Result<&[Option<NaiveDate>]> {
        match self.column(name)? {
            Column::Date(v) => Ok(v),
            other => Err(CreelError::ColumnType {
                column: name.to_string(),
                expected: "date",
                found: other.type_name(),
            }),
        }
    }

    /// Time column accessor.
    pub fn time(&self, name: &str) -> Result<&[Option<NaiveTime>]> {
        match self.column(name)? {
            Column::Time(v) => Ok(v),
            other => Err(CreelError::ColumnType {
                column: name.to_string(),
                expected: "time",
                found: other.type_name(),
            }),
        }
    }

    /// Flag column accessor.
    pub fn flag(&self, name: &str) -> Result<&[Option<bool>]> {
        match self.column(name)? {
            Column::Flag(v) => Ok(v),
            other => Err(CreelError::ColumnType {
                column: name.to_string(),
                expected: "flag",
                found: other.type_name(),
            }),
        }
    }

    /// Renders one cell of a named column as a key string.
    pub(crate) fn render_cell(&self, name: &str, row: usize) -> Result<Option<String>> {
        Ok(self.column(name)?.render(row))
    }

    /// Builds the stratum key for a single row over the given key columns.
    ///
    /// Missing cells render as `"NA"` so that rows with incomplete keys
    /// still group together and can be flagged downstream.
    pub(crate) fn row_key<S: AsRef<str>>(&self, keys: &[S], row: usize) -> Result<StratumKey> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = self.render_cell(key.as_ref(), row)?;
            values.push(value.unwrap_or_else(|| NULL_KEY.to_string()));
        }
        Ok(StratumKey::new(values))
    }

    /// Groups row indices by the combined value of the key columns.
    ///
    /// Groups appear in first-seen row order, which makes every estimate
    /// table deterministic for a given input frame.
    pub fn group_rows<S: AsRef<str>>(&self, keys: &[S]) -> Result<IndexMap<StratumKey, Vec<usize>>> {
        if keys.is_empty() {
            return Err(CreelError::invalid(
                "keys",
                "at least one stratification column is required",
            ));
        }
        // Resolve all key columns up front so a bad name fails before grouping.
        for key in keys {
            self.column(key.as_ref())?;
        }
        let mut groups: IndexMap<StratumKey, Vec<usize>> = IndexMap::new();
        for row in 0..self.len {
            let key = self.row_key(keys, row)?;
            groups.entry(key).or_default().push(row);
        }
        Ok(groups)
    }

    /// Set of distinct stratum keys over the given key columns.
    pub(crate) fn key_set<S: AsRef<str>>(
        &self,
        keys: &[S],
    ) -> Result<std::collections::HashSet<StratumKey>> {
        let groups = self.group_rows(keys)?;
        Ok(groups.into_keys().collect())
    }
}

/// Builder for [`SurveyFrame`]; columns keep insertion order.
#[derive(Debug, Default)]
pub struct FrameBuilder {
    columns: IndexMap<String, Column>,
    duplicate: Option<String>,
}

impl FrameBuilder {
    fn push(mut self, name: &str, column: Column) -> Self {
        if self.columns.contains_key(name) && self.duplicate.is_none() {
            self.duplicate = Some(name.to_string());
        }
        self.columns.insert(name.to_string(), column);
        self
    }

    /// Adds a numeric column with no missing values.
    pub fn numeric(self, name: &str, values: Vec<f64>) -> Self {
        self.push(name, Column::Numeric(values.into_iter().map(Some).collect()))
    }

    /// Adds a numeric column that may contain missing values.
    pub fn numeric_opt(self, name: &str, values: Vec<Option<f64>>) -> Self {
        self.push(name, Column::Numeric(values))
    }

    /// Adds a text column with no missing values.
    pub fn text<I: Into<String>>(self, name: &str, values: Vec<I>) -> Self {
        self.push(
            name,
            Column::Text(values.into_iter().map(|v| Some(v.into())).collect()),
        )
    }

    /// Adds a text column that may contain missing values.
    pub fn text_opt(self, name: &str, values: Vec<Option<String>>) -> Self {
        self.push(name, Column::Text(values))
    }

    /// Adds a date column with no missing values.
    pub fn date(self, name: &str, values: Vec<NaiveDate>) -> Self {
        self.push(name, Column::Date(values.into_iter().map(Some).collect()))
    }

    /// Adds a date column that may contain missing values.
    pub fn date_opt(self, name: &str, values: Vec<Option<NaiveDate>>) -> Self {
        self.push(name, Column::Date(values))
    }

    /// Adds a time column with no missing values.
    pub fn time(self, name: &str, values: Vec<NaiveTime>) -> Self {
        self.push(name, Column::Time(values.into_iter().map(Some).collect()))
    }

    /// Adds a time column that may contain missing values.
    pub fn time_opt(self, name: &str, values: Vec<Option<NaiveTime>>) -> Self {
        self.push(name, Column::Time(values))
    }

    /// Adds a flag column with no missing values.
    pub fn flag(self, name: &str, values: Vec<bool>) -> Self {
        self.push(name, Column::Flag(values.into_iter().map(Some).collect()))
    }

    /// Adds a flag column that may contain missing values.
    pub fn flag_opt(self, name: &str, values: Vec<Option<bool>>) -> Self {
        self.push(name, Column::Flag(values))
    }

    /// Adds an already-typed column.
    pub fn column(self, name: &str, column: Column) -> Self {
        self.push(name, column)
    }

    /// Finalizes the frame, checking that all columns have equal length.
    pub fn build(self) -> Result<SurveyFrame> {
        if let Some(name) = self.duplicate {
            return Err(CreelError::invalid(
                "column",
                format!("duplicate column name '{name}'"),
            ));
        }
        if self.columns.is_empty() {
            return Err(CreelError::EmptyFrame("frame has no columns".to_string()));
        }
        let mut len: Option<(usize, &str)> = None;
        for (name, column) in &self.columns {
            match len {
                None => len = Some((column.len(), name)),
                Some((expected, first)) if column.len() != expected => {
                    return Err(CreelError::invalid(
                        "column",
                        format!(
                            "column '{name}' has {} rows but '{first}' has {expected}",
                            column.len()
                        ),
                    ));
                }
                _ => {}
            }
        }
        let len = len.map(|(n, _)| n).unwrap_or(0);
        if len == 0 {
            return Err(CreelError::EmptyFrame("frame has no rows".to_string()));
        }
        Ok(SurveyFrame {
            columns: self.columns,
            len,
        })
    }
}
