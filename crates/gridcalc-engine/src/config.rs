use gridcalc_common::SheetLimits;

/// What happens to a formula when a row/column delete removes a cell it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletedRefPolicy {
    /// A clean formula is replaced by its last computed value. Formulas whose
    /// last value was empty or an error keep the invalid operand.
    #[default]
    ConvertToValue,
    /// The formula keeps an invalid operand and evaluates to `#REF!`.
    RefError,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub enable_parallel: bool,
    pub max_threads: Option<usize>,
    /// Below this many dirty formula cells `calc_all` stays sequential.
    pub min_parallel_cells: usize,
    pub deleted_ref_policy: DeletedRefPolicy,
    pub limits: SheetLimits,
    /// Columns allocated up front for every new sheet.
    pub eager_columns: u32,
    /// Run an interactive `recalc` after every edit.
    pub auto_calc: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_parallel: true,
            max_threads: None,
            min_parallel_cells: 64,
            deleted_ref_policy: DeletedRefPolicy::default(),
            limits: SheetLimits::default(),
            eager_columns: 1,
            auto_calc: false,
        }
    }
}

impl EngineConfig {
    pub fn with_parallel(mut self, enable: bool) -> Self {
        self.enable_parallel = enable;
        self
    }

    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = Some(threads);
        self
    }

    pub fn with_min_parallel_cells(mut self, cells: usize) -> Self {
        self.min_parallel_cells = cells;
        self
    }

    pub fn with_deleted_ref_policy(mut self, policy: DeletedRefPolicy) -> Self {
        self.deleted_ref_policy = policy;
        self
    }

    pub fn with_limits(mut self, limits: SheetLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_eager_columns(mut self, columns: u32) -> Self {
        self.eager_columns = columns;
        self
    }

    pub fn with_auto_calc(mut self, enable: bool) -> Self {
        self.auto_calc = enable;
        self
    }
}
