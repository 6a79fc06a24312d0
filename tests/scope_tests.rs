//! Tracing tests: scoping rules, naming and poisoning of the kernel builder.

use anyhow::Result;
use polystage::ir::Stmt;
use polystage::prelude::*;
use pretty_assertions::assert_eq;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn trace<F>(kernel: F) -> StageResult<Schedule>
where
    F: FnOnce(&mut KernelBuilder, &[Tensor]) -> StageResult<Vec<Tensor>>,
{
    create_schedule(&BuildConfig::default(), "k", &[placeholder("A", &[4, 4])], kernel)
}

fn scope_kind(result: StageResult<Schedule>) -> Option<ScopeErrorKind> {
    result.err().and_then(|e| e.scope_kind())
}

#[test]
fn test_else_after_nested_if_attaches_to_outer() -> Result<()> {
    init_logger();
    let s = trace(|kb, ts| {
        let a = ts[0].clone();
        let i = kb.for_range(0, 4)?;
        let j = kb.for_range(0, 4)?;
        let ij = [i.clone(), j.clone()];
        kb.if_(i.lt(2))?;
        kb.if_(j.lt(2))?;
        kb.store(&a, &ij, 1)?;
        kb.end()?;
        kb.end()?;
        kb.else_()?;
        kb.store(&a, &ij, 2)?;
        kb.end()?;
        kb.end()?;
        kb.end()?;
        Ok(vec![])
    })?;

    let Stmt::For(outer) = &s.body().stmts[0] else { panic!("expected loop") };
    let Stmt::For(inner) = &outer.body.stmts[0] else { panic!("expected loop") };
    assert_eq!(inner.body.stmts.len(), 1);
    let Stmt::If(chain) = &inner.body.stmts[0] else { panic!("expected if chain") };
    assert!(chain.else_body.is_some());
    let Stmt::If(nested) = &chain.branches[0].1.stmts[0] else { panic!("expected nested if") };
    assert!(nested.else_body.is_none());

    let mut args = vec![HostArray::new(ValueType::Int(32), &[4, 4])?];
    build(&s)?.run(&mut args)?;
    assert_eq!(args[0].as_ints(), vec![1, 1, 0, 0, 1, 1, 0, 0, 2, 2, 2, 2, 2, 2, 2, 2]);
    Ok(())
}

#[test]
fn test_else_inside_outer_branch_attaches_to_inner() -> Result<()> {
    let s = trace(|kb, ts| {
        let a = ts[0].clone();
        let i = kb.for_range(0, 4)?;
        kb.if_(i.lt(2))?;
        kb.if_(i.eq_(0))?;
        kb.store(&a, &[i.clone(), Expr::int(0)], 1)?;
        kb.end()?;
        kb.else_()?;
        kb.store(&a, &[i.clone(), Expr::int(0)], 2)?;
        kb.end()?;
        kb.end()?;
        kb.end()?;
        Ok(vec![])
    })?;
    let mut args = vec![HostArray::new(ValueType::Int(32), &[4, 4])?];
    build(&s)?.run(&mut args)?;
    let column: Vec<i64> = (0..4).filter_map(|i| args[0].get(&[i, 0])).collect();
    assert_eq!(column, vec![1, 2, 0, 0]);
    Ok(())
}

#[test]
fn test_elif_after_else_is_unmatched() {
    let result = trace(|kb, _| {
        kb.if_(Expr::int(1))?;
        kb.end()?;
        kb.else_()?;
        kb.end()?;
        kb.elif_(Expr::int(0))?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::UnmatchedElif));

    let result = trace(|kb, _| {
        kb.elif_(Expr::int(0))?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::UnmatchedElif));
}

#[test]
fn test_chain_does_not_survive_a_new_if() {
    let result = trace(|kb, _| {
        kb.if_(Expr::int(1))?;
        kb.end()?;
        kb.if_(Expr::int(0))?;
        kb.end()?;
        kb.else_()?;
        kb.end()?;
        kb.else_()?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::UnmatchedElse));
}

#[test]
fn test_break_is_rejected() {
    let result = trace(|kb, _| {
        let i = kb.for_range(0, 4)?;
        kb.if_(i.eq_(2))?;
        kb.break_()?;
        kb.end()?;
        kb.end()?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::EarlyExit));
}

#[test]
fn test_break_in_while_is_rejected() {
    let result = trace(|kb, ts| {
        let a = ts[0].clone();
        kb.while_(a.at(&[Expr::int(0), Expr::int(0)])?.lt(10))?;
        kb.if_(a.at(&[Expr::int(0), Expr::int(0)])?.eq_(5))?;
        kb.break_()?;
        kb.end()?;
        kb.store(&a, &[Expr::int(0), Expr::int(0)], a.at(&[Expr::int(0), Expr::int(0)])? + 1)?;
        kb.end()?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::EarlyExit));
}

#[test]
fn test_break_in_nested_loops_is_rejected() {
    let result = trace(|kb, ts| {
        let a = ts[0].clone();
        let i = kb.for_range(0, 4)?;
        let j = kb.for_range(0, 4)?;
        kb.break_()?;
        kb.store(&a, &[i, j], 1)?;
        kb.end()?;
        kb.end()?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::EarlyExit));
}

#[test]
fn test_swallowed_error_still_poisons_the_kernel() {
    let result = trace(|kb, ts| {
        let a = ts[0].clone();
        let _ = kb.break_();
        let later = kb.store(&a, &[Expr::int(0), Expr::int(0)], 1);
        assert_eq!(later.unwrap_err().scope_kind(), Some(ScopeErrorKind::EarlyExit));
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::EarlyExit));
}

#[test]
fn test_end_without_scope() {
    let result = trace(|kb, _| {
        kb.end()?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::UnmatchedEnd));

    let result = trace(|kb, _| {
        kb.compute(&[2], Some("B"), None, |kb, _| {
            kb.end()?;
            Ok(Expr::int(0))
        })?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::UnmatchedEnd));
}

#[test]
fn test_stage_body_must_close_its_scopes() {
    let result = trace(|kb, _| {
        kb.mutate(&[2], Some("M"), |kb, _| {
            kb.for_range(0, 2)?;
            Ok(())
        })?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::UnclosedScope));

    let result = trace(|kb, _| {
        kb.for_each(0, 2, 1, None, |kb, _| {
            kb.while_(Expr::int(0))?;
            Ok(())
        })?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::UnclosedScope));
}

#[test]
fn test_loop_bounds() -> Result<()> {
    let result = trace(|kb, ts| {
        let a = ts[0].clone();
        kb.for_(0, a.at(&[Expr::int(0), Expr::int(0)])?, 1, None)?;
        kb.end()?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::NonAffineBound));

    let result = trace(|kb, _| {
        let i = kb.for_range(0, 4)?;
        kb.end()?;
        kb.for_range(0, i)?;
        kb.end()?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::NonAffineBound));

    let result = trace(|kb, _| {
        kb.for_(0, 4, 0, None)?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::InvalidStep));

    // Triangular nest: the inner bound is affine in the outer variable.
    let s = trace(|kb, ts| {
        let a = ts[0].clone();
        kb.for_each(0, 4, 1, None, |kb, i| {
            kb.for_each(0, i.clone() + 1, 1, None, |kb, j| kb.store(&a, &[i.clone(), j], 1))
        })?;
        Ok(vec![])
    })?;
    let mut args = vec![HostArray::new(ValueType::Int(32), &[4, 4])?];
    build(&s)?.run(&mut args)?;
    assert_eq!(args[0].as_ints().iter().sum::<i64>(), 10);
    assert_eq!(args[0].get(&[1, 2]), Some(0));
    Ok(())
}

#[test]
fn test_duplicate_names() {
    let result = trace(|kb, ts| {
        let a = ts[0].clone();
        kb.compute(&[4], Some("B"), None, |_, i| a.at(&[i[0].clone(), Expr::int(0)]))?;
        kb.compute(&[4], Some("B"), None, |_, _| Ok(Expr::int(0)))?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::DuplicateName));

    let result = trace(|kb, _| {
        kb.for_(0, 4, 1, Some("S"))?;
        kb.end()?;
        kb.for_(0, 4, 1, Some("S"))?;
        kb.end()?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::DuplicateName));

    let result = trace(|kb, _| {
        kb.scalar(0, Some("A"), None)?;
        Ok(vec![])
    });
    assert_eq!(scope_kind(result), Some(ScopeErrorKind::DuplicateName));
}

#[test]
fn test_auto_names_skip_explicit_ones() -> Result<()> {
    let s = trace(|kb, _| {
        kb.compute(&[2], Some("compute_0"), None, |_, _| Ok(Expr::int(1)))?;
        kb.compute(&[2], None, None, |_, _| Ok(Expr::int(2)))?;
        let t = kb.scalar(0, None, None)?;
        assert_eq!(t.name(), "scalar_0");
        Ok(vec![])
    })?;
    assert!(s.stage("compute_1").is_ok());
    let names: Vec<&str> = s.stage("compute_1")?.axes().iter().map(|&a| s.axis(a).map(|x| x.name())).collect::<StageResult<_>>()?;
    assert_eq!(names, vec!["compute_1_i0"]);
    Ok(())
}

#[test]
fn test_bit_level_type_errors() {
    let result = trace(|kb, ts| {
        let x = ts[0].at(&[Expr::int(0), Expr::int(0)])?;
        kb.assign_bit(&x, 32, 1)?;
        Ok(vec![])
    });
    assert_eq!(result.unwrap_err().type_kind(), Some(TypeErrorKind::BitOutOfRange));

    let result = trace(|kb, ts| {
        let x = ts[0].at(&[Expr::int(0), Expr::int(0)])?;
        kb.assign_slice(&x, 8, 4, 0)?;
        Ok(vec![])
    });
    assert_eq!(result.unwrap_err().type_kind(), Some(TypeErrorKind::InvalidSlice));

    let result = trace(|kb, ts| {
        let x = ts[0].at(&[Expr::int(0), Expr::int(0)])?;
        kb.assign_field(&x, "lo", 0)?;
        Ok(vec![])
    });
    assert_eq!(result.unwrap_err().type_kind(), Some(TypeErrorKind::UnknownField));

    let result = trace(|_, ts| {
        ts[0].at(&[Expr::int(0)])?;
        Ok(vec![])
    });
    assert_eq!(result.unwrap_err().type_kind(), Some(TypeErrorKind::IndexArity));
}
