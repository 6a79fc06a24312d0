//! Frontend: tracing kernel functions into a schedule.
//!
//! A kernel is ordinary Rust code that drives a [`KernelBuilder`]. Loops,
//! conditionals and assignments are recorded as they are issued:
//!
//! ```text
//! create_schedule(&config, "popcount", &[placeholder("A", &[10, 20])], |kb, ts| {
//!     let b = kb.compute(&[10, 20], Some("B"), None, |_, _| Ok(Expr::int(0)))?;
//!     let x = kb.for_(0, 10, 1, Some("C"))?;
//!     let y = kb.for_range(0, 20)?;
//!     ...
//!     kb.end()?;
//!     kb.end()?;
//!     Ok(vec![b])
//! })
//! ```
//!
//! Scoping is explicit: every `for_`, `while_`, `if_`, `elif_` and `else_` is
//! closed by `end()`, or the closure helpers (`for_each`, `if_then`, ...) are
//! used instead.

pub mod builder;
mod scope;

pub use builder::{create_schedule, placeholder, KernelBuilder, PlaceholderSpec};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::ir::{Expr, Stmt};
    use crate::utils::errors::ScopeErrorKind;

    #[test]
    fn test_if_elif_else_chain() {
        let s = create_schedule(&BuildConfig::default(), "k", &[placeholder("A", &[4])], |kb, ts| {
            let a = ts[0].clone();
            let i = kb.for_range(0, 4)?;
            kb.if_(i.lt(1))?;
            kb.store(&a, &[i.clone()], 1)?;
            kb.end()?;
            kb.elif_(i.lt(2))?;
            kb.store(&a, &[i.clone()], 2)?;
            kb.end()?;
            kb.else_()?;
            kb.store(&a, &[i.clone()], 3)?;
            kb.end()?;
            kb.end()?;
            Ok(vec![])
        })
        .unwrap();
        match &s.body().stmts[0] {
            Stmt::For(l) => match &l.body.stmts[0] {
                Stmt::If(chain) => {
                    assert_eq!(chain.branches.len(), 2);
                    assert!(chain.else_body.is_some());
                }
                other => panic!("expected if chain, got {:?}", other),
            },
            other => panic!("expected loop, got {:?}", other),
        }
    }

    #[test]
    fn test_else_after_other_statement() {
        let err = create_schedule(&BuildConfig::default(), "k", &[placeholder("A", &[4])], |kb, ts| {
            let a = ts[0].clone();
            kb.if_(Expr::int(1))?;
            kb.end()?;
            kb.store(&a, &[Expr::int(0)], 1)?;
            kb.else_()?;
            Ok(vec![])
        })
        .unwrap_err();
        assert_eq!(err.scope_kind(), Some(ScopeErrorKind::UnmatchedElse));
    }

    #[test]
    fn test_unclosed_scope() {
        let err = create_schedule(&BuildConfig::default(), "k", &[], |kb, _| {
            kb.for_range(0, 4)?;
            Ok(vec![])
        })
        .unwrap_err();
        assert_eq!(err.scope_kind(), Some(ScopeErrorKind::UnclosedScope));
    }
}
