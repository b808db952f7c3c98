//! Named row ranges used for energy-breakdown reporting.

/// A named interval of constraint rows.
///
/// Ranges only label rows for reporting. They never influence which moves
/// the annealer accepts.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstraintRange {
    pub name: String,
    pub short_name: String,
    /// First row, inclusive.
    pub start_row: usize,
    /// Last row, exclusive.
    pub end_row: usize,
    /// Whether the rows index the inequality system.
    pub inequality: bool,
}

impl ConstraintRange {
    pub fn new(
        name: impl Into<String>,
        short_name: impl Into<String>,
        start_row: usize,
        end_row: usize,
        inequality: bool,
    ) -> Self {
        Self {
            name: name.into(),
            short_name: short_name.into(),
            start_row,
            end_row,
            inequality,
        }
    }

    /// Whether `row` falls inside this range (ignoring which system it indexes).
    #[inline]
    pub fn contains(&self, row: usize) -> bool {
        row >= self.start_row && row < self.end_row
    }

    /// Whether `row` of the equality (`false`) or inequality (`true`) system
    /// falls inside this range.
    #[inline]
    pub fn contains_in(&self, row: usize, inequality: bool) -> bool {
        self.inequality == inequality && self.contains(row)
    }

    /// Number of rows covered.
    pub fn len(&self) -> usize {
        self.end_row.saturating_sub(self.start_row)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for ConstraintRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.inequality { "ineq" } else { "eq" };
        write!(
            f,
            "{} ({}, {kind} rows {}..{})",
            self.name, self.short_name, self.start_row, self.end_row
        )
    }
}
