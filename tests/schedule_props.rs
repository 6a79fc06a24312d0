//! Property tests: loop transformations never change what a kernel computes,
//! and bit-level reads and writes agree with integer arithmetic.

use polystage::prelude::*;
use proptest::prelude::*;

/// `B[i, j] = 2 * A[i, j] + i - j` over an `n x m` grid.
fn elementwise(config: &BuildConfig, n: i64, m: i64) -> StageResult<Schedule> {
    create_schedule(config, "elementwise", &[placeholder("A", &[n, m])], |kb, ts| {
        let a = ts[0].clone();
        let b = kb.compute(&[n, m], Some("B"), None, |_, i| {
            Ok(a.at(i)? * 2 + i[0].clone() - i[1].clone())
        })?;
        Ok(vec![b])
    })
}

fn run(s: &Schedule, n: i64, m: i64, input: &[i64]) -> StageResult<Vec<i64>> {
    let mut args = vec![
        HostArray::from_ints(ValueType::Int(32), &[n, m], input)?,
        HostArray::new(ValueType::Int(32), &[n, m])?,
    ];
    build(s)?.run(&mut args)?;
    Ok(args[1].as_ints())
}

fn expected(n: i64, m: i64, input: &[i64]) -> Vec<i64> {
    let mut out = Vec::with_capacity(input.len());
    for i in 0..n {
        for j in 0..m {
            out.push(2 * input[(i * m + j) as usize] + i - j);
        }
    }
    out
}

fn grid() -> impl Strategy<Value = (i64, i64, Vec<i64>)> {
    (1i64..9, 1i64..9).prop_flat_map(|(n, m)| {
        (Just(n), Just(m), prop::collection::vec(-1000i64..1000, (n * m) as usize))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn tiling_preserves_results((n, m, input) in grid(), fx in 1i64..10, fy in 1i64..10) {
        let mut s = elementwise(&BuildConfig::default(), n, m).unwrap();
        let x = s.stage("B").unwrap().axis(0).unwrap();
        let y = s.stage("B").unwrap().axis(1).unwrap();
        let (xo, xi) = s.split(x, fx).unwrap();
        let (yo, yi) = s.split(y, fy).unwrap();
        s.reorder(&[xo, yo, xi, yi]).unwrap();
        prop_assert_eq!(run(&s, n, m, &input).unwrap(), expected(n, m, &input));
    }

    #[test]
    fn fuse_then_split_preserves_results((n, m, input) in grid(), f in 1i64..20) {
        let mut s = elementwise(&BuildConfig::default(), n, m).unwrap();
        let x = s.stage("B").unwrap().axis(0).unwrap();
        let y = s.stage("B").unwrap().axis(1).unwrap();
        let fused = s.fuse(x, y).unwrap();
        s.split(fused, f).unwrap();
        prop_assert_eq!(run(&s, n, m, &input).unwrap(), expected(n, m, &input));
    }

    #[test]
    fn guarded_inner_first_preserves_results((n, m, input) in grid(), f in 1i64..10) {
        let mut s = elementwise(&BuildConfig::default(), n, m).unwrap();
        let y = s.stage("B").unwrap().axis(1).unwrap();
        let (outer, inner) = s.split(y, f).unwrap();
        s.reorder(&[inner, outer]).unwrap();
        prop_assert_eq!(run(&s, n, m, &input).unwrap(), expected(n, m, &input));
    }

    #[test]
    fn materialized_unroll_preserves_results((n, m, input) in grid(), f in 0i64..6) {
        let config = BuildConfig::default().materialize_unroll(true);
        let mut s = elementwise(&config, n, m).unwrap();
        let y = s.stage("B").unwrap().axis(1).unwrap();
        s.unroll(y, f).unwrap();
        prop_assert_eq!(run(&s, n, m, &input).unwrap(), expected(n, m, &input));
    }

    #[test]
    fn compute_at_preserves_results((n, m, input) in grid(), f in 1i64..5) {
        let build_pipeline = |split: bool| -> StageResult<Schedule> {
            let mut s = create_schedule(&BuildConfig::default(), "pipeline", &[placeholder("A", &[n, m])], |kb, ts| {
                let a = ts[0].clone();
                let b = kb.compute(&[n, m], Some("B"), None, |_, i| Ok(a.at(i)? + 1))?;
                let c = kb.compute(&[n, m], Some("C"), None, |_, i| Ok(b.at(i)? * 2 + i[0].clone() - i[1].clone() - 2))?;
                Ok(vec![c])
            })?;
            let (b, c) = (s.stage_id("B")?, s.stage_id("C")?);
            let axis = s.stage("C")?.axis(if split { 0 } else { 1 })?;
            let target = if split { s.split(axis, f)?.0 } else { axis };
            s.compute_at(b, c, target)?;
            Ok(s)
        };
        for split in [false, true] {
            let s = build_pipeline(split).unwrap();
            prop_assert_eq!(run(&s, n, m, &input).unwrap(), expected(n, m, &input));
        }
    }

    #[test]
    fn bit_and_slice_reads_match_shifts(v in any::<u32>(), lo in 0u32..32, len in 1u32..33, bit in 0i64..32) {
        let hi = (lo + len).min(32);
        let s = create_schedule(
            &BuildConfig::default(),
            "bits",
            &[placeholder("A", &[1]).dtype(ValueType::UInt(32)), placeholder("B", &[2]).dtype(ValueType::UInt(32))],
            |kb, ts| {
                let (a, b) = (ts[0].clone(), ts[1].clone());
                let x = a.at(&[Expr::int(0)])?;
                kb.store(&b, &[Expr::int(0)], x.slice(lo, hi)?)?;
                kb.store(&b, &[Expr::int(1)], x.bit(bit)?)?;
                Ok(vec![])
            },
        ).unwrap();
        let mut args = vec![
            HostArray::from_ints(ValueType::UInt(32), &[1], &[v as i64]).unwrap(),
            HostArray::new(ValueType::UInt(32), &[2]).unwrap(),
        ];
        build(&s).unwrap().run(&mut args).unwrap();
        let mask = if hi - lo == 32 { u32::MAX } else { (1u32 << (hi - lo)) - 1 };
        prop_assert_eq!(args[1].as_ints(), vec![((v >> lo) & mask) as i64, ((v >> bit) & 1) as i64]);
    }

    #[test]
    fn slice_write_then_read(v in any::<u16>(), w in any::<u16>(), lo in 0u32..16, len in 1u32..17) {
        let hi = (lo + len).min(16);
        let s = create_schedule(
            &BuildConfig::default(),
            "slice",
            &[placeholder("A", &[1]).dtype(ValueType::UInt(16)), placeholder("B", &[1]).dtype(ValueType::UInt(16))],
            |kb, ts| {
                let (a, b) = (ts[0].clone(), ts[1].clone());
                let x = a.at(&[Expr::int(0)])?;
                kb.assign_slice(&x, lo, hi, Expr::typed_int(w as i64, ValueType::UInt(16)))?;
                kb.store(&b, &[Expr::int(0)], a.at(&[Expr::int(0)])?.slice(lo, hi)?)?;
                Ok(vec![])
            },
        ).unwrap();
        let mut args = vec![
            HostArray::from_ints(ValueType::UInt(16), &[1], &[v as i64]).unwrap(),
            HostArray::new(ValueType::UInt(16), &[1]).unwrap(),
        ];
        build(&s).unwrap().run(&mut args).unwrap();
        let mask = ((1u32 << (hi - lo)) - 1) as u16;
        let field = w & mask;
        let written = (v & !(mask << lo)) | (field << lo);
        prop_assert_eq!(args[0].as_ints(), vec![written as i64]);
        prop_assert_eq!(args[1].as_ints(), vec![field as i64]);
    }

    #[test]
    fn reverse_twice_is_identity(v in any::<u16>(), lo in 0u32..16, len in 1u32..17) {
        let hi = (lo + len).min(16);
        let s = create_schedule(
            &BuildConfig::default(),
            "reverse",
            &[placeholder("A", &[1]).dtype(ValueType::UInt(16)), placeholder("B", &[2]).dtype(ValueType::UInt(16))],
            |kb, ts| {
                let (a, b) = (ts[0].clone(), ts[1].clone());
                let x = a.at(&[Expr::int(0)])?.slice(lo, hi)?;
                kb.store(&b, &[Expr::int(0)], x.reverse()?)?;
                kb.store(&b, &[Expr::int(1)], x.reverse()?.reverse()?)?;
                Ok(vec![])
            },
        ).unwrap();
        let mut args = vec![
            HostArray::from_ints(ValueType::UInt(16), &[1], &[v as i64]).unwrap(),
            HostArray::new(ValueType::UInt(16), &[2]).unwrap(),
        ];
        build(&s).unwrap().run(&mut args).unwrap();
        let width = hi - lo;
        let field = ((v as u32) >> lo) & ((1u32 << width) - 1);
        let reversed = (0..width).fold(0u32, |acc, b| acc | (((field >> b) & 1) << (width - 1 - b)));
        prop_assert_eq!(args[1].as_ints(), vec![reversed as i64, field as i64]);
    }
}
