//! Running analyses.
use std::{cell::Cell, collections::HashMap, fmt, hash::Hash, rc::Rc};

use log::debug;

use super::{
    AnalysisError, DataFlowAnalysis, context::AnalysisContext, entity::EntityArena, fixed_point,
    result::DataFlowAnalysisResult,
};

/// A flag to abort running analyses.
///
/// Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Rc<Cell<bool>>);

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the cancellation of every run observing this token.
    pub fn cancel(&self) {
        self.0.set(true);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

/// The state shared by the analyses of a program.
///
/// Entities are interned in the session, so results of runs sharing a session can be
/// consumed by later runs.
#[derive(Debug, Default)]
pub struct AnalysisSession {
    pub(crate) entities: EntityArena,
    cancellation: CancellationToken,
}

impl AnalysisSession {
    /// Creates a session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session observing a cancellation token.
    #[must_use]
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            entities: EntityArena::new(),
            cancellation,
        }
    }

    /// Returns the entities created so far.
    #[must_use]
    pub const fn entities(&self) -> &EntityArena {
        &self.entities
    }

    /// Returns the cancellation token of the session.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), AnalysisError> {
        if self.cancellation.is_cancelled() {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Runs an analysis to a fixed point.
///
/// # Errors
/// Returns [`AnalysisError::Cancelled`] if the session is cancelled before the run
/// completes.
pub fn run<A: DataFlowAnalysis>(
    analysis: &A,
    context: &AnalysisContext<A>,
    session: &mut AnalysisSession,
) -> Result<Rc<DataFlowAnalysisResult<A>>, AnalysisError> {
    debug!("Running {} over {}", A::NAME, context.cfg().id());
    let result = fixed_point::analyze(analysis, context, session)?;
    Ok(Rc::new(result))
}

/// Results of top-level runs, keyed by analysis and context.
///
/// The entities referenced by cached results belong to the session that computed them,
/// so a cache must only be used together with one session.
#[instability::unstable(feature = "result-cache")]
pub struct ResultCache<A: DataFlowAnalysis> {
    results: HashMap<(A, AnalysisContext<A>), Rc<DataFlowAnalysisResult<A>>>,
}

impl<A: DataFlowAnalysis> Default for ResultCache<A> {
    fn default() -> Self {
        Self {
            results: HashMap::new(),
        }
    }
}

impl<A: DataFlowAnalysis> fmt::Debug for ResultCache<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("len", &self.results.len())
            .finish()
    }
}

impl<A: DataFlowAnalysis> ResultCache<A> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of cached results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Drops every cached result.
    pub fn clear(&mut self) {
        self.results.clear();
    }
}

/// Runs an analysis, reusing the result of an earlier run with an equal analysis and
/// context.
///
/// Cancelled runs are not cached.
///
/// # Errors
/// Returns [`AnalysisError::Cancelled`] if the session is cancelled before the run
/// completes.
#[instability::unstable(feature = "result-cache")]
pub fn run_cached<A>(
    analysis: &A,
    context: &AnalysisContext<A>,
    session: &mut AnalysisSession,
    cache: &mut ResultCache<A>,
) -> Result<Rc<DataFlowAnalysisResult<A>>, AnalysisError>
where
    A: DataFlowAnalysis + Clone + Eq + Hash,
{
    if context.is_interprocedural() {
        return run(analysis, context, session);
    }
    let key = (analysis.clone(), context.clone());
    if let Some(result) = cache.results.get(&key) {
        debug!("Reusing the result of {} over {}", A::NAME, context.cfg().id());
        return Ok(Rc::clone(result));
    }
    let result = run(analysis, context, session)?;
    cache.results.insert(key, Rc::clone(&result));
    Ok(result)
}
