use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of compiler profiling metrics.
///
/// Profiling is enabled via the `PENUMBRA_PROFILE` environment variable and
/// tracks time and call counts for each compilation phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileProfileSnapshot {
    /// Total nanoseconds spent simplifying expressions.
    pub simplify_ns: u64,
    /// Number of simplifier invocations.
    pub simplify_count: u64,
    /// Total nanoseconds spent placing conventions.
    pub convert_ns: u64,
    /// Number of convention placements.
    pub convert_count: u64,
    /// Total nanoseconds spent lowering plans into pull iterators.
    pub compile_ns: u64,
    /// Number of lowered operators.
    pub compile_count: u64,
    /// Total nanoseconds spent unparsing SQL.
    pub sql_emit_ns: u64,
    /// Number of SQL fragments emitted.
    pub sql_emit_count: u64,
    /// Total nanoseconds spent emitting document pipelines.
    pub pipeline_emit_ns: u64,
    /// Number of pipelines emitted.
    pub pipeline_emit_count: u64,
    /// Total nanoseconds spent binding parameter sets into pipelines.
    pub bind_ns: u64,
    /// Number of bound parameter sets.
    pub bind_count: u64,
}

#[derive(Default)]
struct CompileProfileCounters {
    simplify_ns: AtomicU64,
    simplify_count: AtomicU64,
    convert_ns: AtomicU64,
    convert_count: AtomicU64,
    compile_ns: AtomicU64,
    compile_count: AtomicU64,
    sql_emit_ns: AtomicU64,
    sql_emit_count: AtomicU64,
    pipeline_emit_ns: AtomicU64,
    pipeline_emit_count: AtomicU64,
    bind_ns: AtomicU64,
    bind_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<CompileProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("PENUMBRA_PROFILE").is_some())
}

fn counters() -> Option<&'static CompileProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(CompileProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum CompileProfileKind {
    Simplify,
    Convert,
    Compile,
    SqlEmit,
    PipelineEmit,
    Bind,
}

pub(crate) fn record_profile_timer(kind: CompileProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        CompileProfileKind::Simplify => (&counters.simplify_ns, &counters.simplify_count),
        CompileProfileKind::Convert => (&counters.convert_ns, &counters.convert_count),
        CompileProfileKind::Compile => (&counters.compile_ns, &counters.compile_count),
        CompileProfileKind::SqlEmit => (&counters.sql_emit_ns, &counters.sql_emit_count),
        CompileProfileKind::PipelineEmit => {
            (&counters.pipeline_emit_ns, &counters.pipeline_emit_count)
        }
        CompileProfileKind::Bind => (&counters.bind_ns, &counters.bind_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of the compiler profiling counters.
///
/// Returns `None` when profiling is disabled (`PENUMBRA_PROFILE` unset). With
/// `reset` set, counters are zeroed as they are read.
///
/// ```no_run
/// use penumbra::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("simplify: {} calls", snapshot.simplify_count);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<CompileProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(CompileProfileSnapshot {
        simplify_ns: load(&counters.simplify_ns),
        simplify_count: load(&counters.simplify_count),
        convert_ns: load(&counters.convert_ns),
        convert_count: load(&counters.convert_count),
        compile_ns: load(&counters.compile_ns),
        compile_count: load(&counters.compile_count),
        sql_emit_ns: load(&counters.sql_emit_ns),
        sql_emit_count: load(&counters.sql_emit_count),
        pipeline_emit_ns: load(&counters.pipeline_emit_ns),
        pipeline_emit_count: load(&counters.pipeline_emit_count),
        bind_ns: load(&counters.bind_ns),
        bind_count: load(&counters.bind_count),
    })
}
