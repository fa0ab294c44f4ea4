//! Mutation hooks and query interceptors.
//!
//! A hook wraps the next [`Mutator`] in the chain and returns a new one.
//! [`compose`] folds a hook list around a terminal mutator right to left, so
//! the first hook is the outermost wrapper and the last one sits directly
//! around the terminal step. Interceptors do the same for queries.

use std::rc::Rc;
use std::sync::Arc;

use ahash::AHashMap;

use crate::errors::GraphSqlError;
use crate::mutation::{Mutation, MutationOutput, Op};
use crate::record::Record;
use crate::spec::QuerySpec;

pub trait Mutator {
    fn mutate(&self, m: &mut Mutation) -> Result<MutationOutput, GraphSqlError>;
}

pub type BoxMutator<'a> = Box<dyn Mutator + 'a>;

/// Adapts a closure into a [`Mutator`].
pub struct MutateFn<F>(pub F);

impl<F> Mutator for MutateFn<F>
where
    F: Fn(&mut Mutation) -> Result<MutationOutput, GraphSqlError>,
{
    fn mutate(&self, m: &mut Mutation) -> Result<MutationOutput, GraphSqlError> {
        (self.0)(m)
    }
}

impl<M: Mutator + ?Sized> Mutator for Rc<M> {
    fn mutate(&self, m: &mut Mutation) -> Result<MutationOutput, GraphSqlError> {
        (**self).mutate(m)
    }
}

impl<M: Mutator + ?Sized> Mutator for Box<M> {
    fn mutate(&self, m: &mut Mutation) -> Result<MutationOutput, GraphSqlError> {
        (**self).mutate(m)
    }
}

pub trait Hook: Send + Sync {
    fn wrap<'a>(&self, next: BoxMutator<'a>) -> BoxMutator<'a>;
}

type AroundFn = dyn Fn(&mut Mutation, &dyn Mutator) -> Result<MutationOutput, GraphSqlError> + Send + Sync;

struct FnHook(Arc<AroundFn>);

struct Around<'a> {
    f: Arc<AroundFn>,
    next: BoxMutator<'a>,
}

impl Mutator for Around<'_> {
    fn mutate(&self, m: &mut Mutation) -> Result<MutationOutput, GraphSqlError> {
        (self.f)(m, self.next.as_ref())
    }
}

impl Hook for FnHook {
    fn wrap<'a>(&self, next: BoxMutator<'a>) -> BoxMutator<'a> {
        Box::new(Around {
            f: Arc::clone(&self.0),
            next,
        })
    }
}

/// A hook from an around-style closure. The closure decides whether and
/// when to call `next`; returning without calling it short-circuits the
/// chain.
pub fn hook_fn<F>(f: F) -> Arc<dyn Hook>
where
    F: Fn(&mut Mutation, &dyn Mutator) -> Result<MutationOutput, GraphSqlError> + Send + Sync + 'static,
{
    Arc::new(FnHook(Arc::new(f)))
}

struct Conditional {
    hook: Arc<dyn Hook>,
    op: Op,
    negate: bool,
}

struct Branch<'a> {
    op: Op,
    negate: bool,
    hooked: BoxMutator<'a>,
    next: Rc<dyn Mutator + 'a>,
}

impl Mutator for Branch<'_> {
    fn mutate(&self, m: &mut Mutation) -> Result<MutationOutput, GraphSqlError> {
        if m.op().is(self.op) != self.negate {
            self.hooked.mutate(m)
        } else {
            self.next.mutate(m)
        }
    }
}

impl Hook for Conditional {
    fn wrap<'a>(&self, next: BoxMutator<'a>) -> BoxMutator<'a> {
        let next: Rc<dyn Mutator + 'a> = Rc::from(next);
        let hooked = self.hook.wrap(Box::new(Rc::clone(&next)));
        Box::new(Branch {
            op: self.op,
            negate: self.negate,
            hooked,
            next,
        })
    }
}

/// Runs `hook` only for mutations whose kind is in `op`.
pub fn on(hook: Arc<dyn Hook>, op: Op) -> Arc<dyn Hook> {
    Arc::new(Conditional {
        hook,
        op,
        negate: false,
    })
}

/// Runs `hook` only for mutations whose kind is not in `op`.
pub fn unless(hook: Arc<dyn Hook>, op: Op) -> Arc<dyn Hook> {
    Arc::new(Conditional {
        hook,
        op,
        negate: true,
    })
}

struct Chain(Vec<Arc<dyn Hook>>);

impl Hook for Chain {
    fn wrap<'a>(&self, next: BoxMutator<'a>) -> BoxMutator<'a> {
        self.0.iter().rev().fold(next, |next, hook| hook.wrap(next))
    }
}

/// Groups hooks into one, applied in list order.
pub fn chain(hooks: Vec<Arc<dyn Hook>>) -> Arc<dyn Hook> {
    Arc::new(Chain(hooks))
}

/// Fails every mutation whose kind is in `op`.
pub fn reject(op: Op) -> Arc<dyn Hook> {
    on(
        hook_fn(|m, _| {
            Err(GraphSqlError::invalid_spec(format!(
                "{:?} operation is not allowed on {}",
                m.op(),
                m.entity()
            )))
        }),
        op,
    )
}

/// Wraps `terminal` in `hooks`, first hook outermost.
///
/// A `None` slot is a hook that was registered but never given an
/// implementation; the whole chain is refused before anything runs.
pub fn compose<'a>(
    target: &str,
    hooks: &[Option<Arc<dyn Hook>>],
    terminal: BoxMutator<'a>,
) -> Result<BoxMutator<'a>, GraphSqlError> {
    if let Some(i) = hooks.iter().position(Option::is_none) {
        return Err(GraphSqlError::uninitialized_hook(format!("{target} (hook {i})")));
    }
    tracing::trace!(entity = target, hooks = hooks.len(), "composing mutation chain");
    Ok(hooks
        .iter()
        .rev()
        .flatten()
        .fold(terminal, |next, hook| hook.wrap(next)))
}

/// Hooks keyed by entity name, plus global hooks applied to every entity.
#[derive(Clone, Default)]
pub struct HookRegistry {
    global: Vec<Option<Arc<dyn Hook>>>,
    entities: AHashMap<String, Vec<Option<Arc<dyn Hook>>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_global(&mut self, hook: Arc<dyn Hook>) {
        self.global.push(Some(hook));
    }

    pub fn register(&mut self, entity: impl Into<String>, hook: Arc<dyn Hook>) {
        self.register_slot(entity, Some(hook));
    }

    /// Registers a possibly-missing hook. Mutations of `entity` fail with
    /// `UninitializedHook` while a `None` slot is present.
    pub fn register_slot(&mut self, entity: impl Into<String>, hook: Option<Arc<dyn Hook>>) {
        self.entities.entry(entity.into()).or_default().push(hook);
    }

    /// Global hooks followed by the hooks of `entity`.
    pub fn hooks_for(&self, entity: &str) -> Vec<Option<Arc<dyn Hook>>> {
        let mut hooks = self.global.clone();
        if let Some(own) = self.entities.get(entity) {
            hooks.extend(own.iter().cloned());
        }
        hooks
    }

    pub fn compose<'a>(&self, entity: &str, terminal: BoxMutator<'a>) -> Result<BoxMutator<'a>, GraphSqlError> {
        compose(entity, &self.hooks_for(entity), terminal)
    }
}

/// Result of a query execution passed through interceptors.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryOutput {
    Records(Vec<Record>),
    Count(usize),
}

/// Executes a query for an entity.
pub trait Querier {
    fn query(&self, entity: &str, spec: &mut QuerySpec) -> Result<QueryOutput, GraphSqlError>;
}

pub type BoxQuerier<'a> = Box<dyn Querier + 'a>;

/// Adapts a closure into a [`Querier`].
pub struct QueryFn<F>(pub F);

impl<F> Querier for QueryFn<F>
where
    F: Fn(&str, &mut QuerySpec) -> Result<QueryOutput, GraphSqlError>,
{
    fn query(&self, entity: &str, spec: &mut QuerySpec) -> Result<QueryOutput, GraphSqlError> {
        (self.0)(entity, spec)
    }
}

/// Wraps query execution. Interceptors may amend the spec (extra filters,
/// ordering) before calling `next`, or inspect its output.
pub trait Interceptor: Send + Sync {
    fn intercept<'a>(&self, next: BoxQuerier<'a>) -> BoxQuerier<'a>;
}

type InterceptFn =
    dyn Fn(&str, &mut QuerySpec, &dyn Querier) -> Result<QueryOutput, GraphSqlError> + Send + Sync;

struct FnInterceptor(Arc<InterceptFn>);

struct Intercepted<'a> {
    f: Arc<InterceptFn>,
    next: BoxQuerier<'a>,
}

impl Querier for Intercepted<'_> {
    fn query(&self, entity: &str, spec: &mut QuerySpec) -> Result<QueryOutput, GraphSqlError> {
        (self.f)(entity, spec, self.next.as_ref())
    }
}

impl Interceptor for FnInterceptor {
    fn intercept<'a>(&self, next: BoxQuerier<'a>) -> BoxQuerier<'a> {
        Box::new(Intercepted {
            f: Arc::clone(&self.0),
            next,
        })
    }
}

pub fn interceptor_fn<F>(f: F) -> Arc<dyn Interceptor>
where
    F: Fn(&str, &mut QuerySpec, &dyn Querier) -> Result<QueryOutput, GraphSqlError> + Send + Sync + 'static,
{
    Arc::new(FnInterceptor(Arc::new(f)))
}

/// Wraps `terminal` in `interceptors`, first interceptor outermost.
pub fn intercept<'a>(interceptors: &[Arc<dyn Interceptor>], terminal: BoxQuerier<'a>) -> BoxQuerier<'a> {
    interceptors
        .iter()
        .rev()
        .fold(terminal, |next, i| i.intercept(next))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn tracer(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn Hook> {
        let log = Arc::clone(log);
        hook_fn(move |m, next| {
            log.lock().expect("log").push(format!("{name}:pre"));
            let out = next.mutate(m);
            log.lock().expect("log").push(format!("{name}:post"));
            out
        })
    }

    #[test]
    fn first_hook_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = vec![Some(tracer(&log, "a")), Some(tracer(&log, "b"))];
        let inner = Arc::clone(&log);
        let terminal = Box::new(MutateFn(move |_: &mut Mutation| -> Result<MutationOutput, GraphSqlError> {
            inner.lock().expect("log").push("apply".into());
            Ok(MutationOutput::Affected(0))
        }));
        let chain = compose("User", &hooks, terminal).expect("compose");
        chain.mutate(&mut Mutation::new(Op::CREATE, "User")).expect("mutate");
        assert_eq!(
            *log.lock().expect("log"),
            ["a:pre", "b:pre", "apply", "b:post", "a:post"]
        );
    }

    #[test]
    fn conditional_hooks_follow_the_op() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = vec![
            Some(on(tracer(&log, "create"), Op::CREATE)),
            Some(unless(tracer(&log, "not-create"), Op::CREATE)),
        ];
        let terminal = Box::new(MutateFn(|_: &mut Mutation| -> Result<MutationOutput, GraphSqlError> {
            Ok(MutationOutput::Affected(0))
        }));
        let chain = compose("User", &hooks, terminal).expect("compose");
        chain.mutate(&mut Mutation::new(Op::DELETE, "User")).expect("mutate");
        assert_eq!(*log.lock().expect("log"), ["not-create:pre", "not-create:post"]);
    }

    #[test]
    fn missing_hook_slot_fails_before_running() {
        let hooks = vec![None];
        let terminal = Box::new(MutateFn(|_: &mut Mutation| -> Result<MutationOutput, GraphSqlError> {
            Ok(MutationOutput::Affected(0))
        }));
        let err = compose("Pet", &hooks, terminal).err().expect("uninitialized");
        assert!(matches!(err, GraphSqlError::UninitializedHook(_)));
    }
}
