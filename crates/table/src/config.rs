//! The immutable pipeline snapshot held in the table's atomic cell

use std::sync::Arc;

use spindle_aggregator::Aggregator;
use spindle_matcher::Matcher;
use spindle_rewriter::Rewriter;
use spindle_route::Route;

/// One immutable generation of the pipeline
///
/// Replaced wholesale on every mutation. The value stays small - four
/// sequence handles - so cloning it for the copy-on-write swap is cheap;
/// the entries themselves are shared behind `Arc`s.
#[derive(Clone, Default)]
pub struct TableConfig {
    /// Applied in order to the name token, after aggregation
    pub(crate) rewriters: Vec<Rewriter>,
    /// Stable order; index-based deletion refers to it
    pub(crate) aggregators: Vec<Arc<Aggregator>>,
    /// First match suppresses the record
    pub(crate) blacklist: Vec<Matcher>,
    /// Every matching route receives the record
    pub(crate) routes: Vec<Arc<dyn Route>>,
}

impl TableConfig {
    /// Number of rewriters
    pub fn rewriter_count(&self) -> usize {
        self.rewriters.len()
    }

    /// Number of aggregators
    pub fn aggregator_count(&self) -> usize {
        self.aggregators.len()
    }

    /// Number of blacklist entries
    pub fn blacklist_count(&self) -> usize {
        self.blacklist.len()
    }

    /// Number of routes
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

impl std::fmt::Debug for TableConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableConfig")
            .field("rewriters", &self.rewriters.len())
            .field("aggregators", &self.aggregators.len())
            .field("blacklist", &self.blacklist.len())
            .field("routes", &self.routes.len())
            .finish()
    }
}
