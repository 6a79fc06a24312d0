//! Textual form of a lowered kernel.
//!
//! The output follows the affine dialect's surface syntax closely enough to be
//! read side by side with it:
//!
//! ```text
//! func @kernel(%A: memref<10x20xi32>, %B: memref<10x20xi32>) {
//!   affine.for %i0 = 0 to 10 {
//!     affine.for %i1 = 0 to 20 {
//!       affine.store %A[%i0, %i1], %B[%i0, %i1]
//!     }
//!   } {stage = "B"}
//! }
//! ```

use super::ast::{AstFor, AstNode, LoweredKernel};
use crate::affine::IndexExpr;
use crate::ir::{Expr, NameTable, TensorId, TensorInfo, ValueType};
use crate::utils::pretty::{format_list, CodeFormatter};
use std::fmt;

/// Writes one kernel through a [`CodeFormatter`].
struct Printer<'a> {
    kernel: &'a LoweredKernel,
    f: CodeFormatter,
}

impl<'a> Printer<'a> {
    fn new(kernel: &'a LoweredKernel) -> Self {
        Self { kernel, f: CodeFormatter::default_indent() }
    }

    fn print(mut self) -> String {
        let params: Vec<String> = self
            .kernel
            .args()
            .map(|t| format!("%{}: {}", t.name, memref_type(t)))
            .collect();
        let header = format!("func @{}({})", self.kernel.name(), params.join(", "));
        let kernel = self.kernel;
        self.f.block(&header, "", |f| {
            for local in kernel.locals() {
                f.writeln(&format!("%{} = memref.alloc() : {}", local.name, memref_type(local)));
            }
            for node in kernel.body() {
                print_node(kernel, f, node);
            }
        });
        self.f.finish()
    }
}

fn print_node(k: &LoweredKernel, f: &mut CodeFormatter, node: &AstNode) {
    let print_body = |f: &mut CodeFormatter, body: &[AstNode]| body.iter().for_each(|n| print_node(k, f, n));
    match node {
        AstNode::For(l) => f.block(&for_header(k, l), &for_attributes(l), |f| print_body(f, &l.body)),
        AstNode::While { cond, body } => {
            f.block(&format!("scf.while {}", cond.render(k)), "", |f| print_body(f, body))
        }
        AstNode::If { branches, else_body } => {
            for (i, (cond, body)) in branches.iter().enumerate() {
                let keyword = if i == 0 { "scf.if" } else { " elif" };
                f.write(&format!("{} {}", keyword, cond.render(k)));
                f.writeln(" {");
                f.indent();
                print_body(f, body);
                f.dedent();
                f.write("}");
            }
            if let Some(body) = else_body {
                f.writeln(" else {");
                f.indent();
                print_body(f, body);
                f.dedent();
                f.write("}");
            }
            f.writeln("");
        }
        AstNode::Guard { lhs, upper, body } => {
            let header = format!("affine.if {} < {}", index(k, lhs), index(k, upper));
            f.block(&header, "", |f| print_body(f, body))
        }
        AstNode::Bind { var, value } => {
            f.writeln(&format!("%{} = affine.apply {}", k.var_name(*var), index(k, value)))
        }
        AstNode::Store { tensor, indices, value } => {
            f.writeln(&format!("affine.store {}, {}", value.render(k), access(k, *tensor, indices)))
        }
        AstNode::StoreBits { tensor, indices, offset, width, value } => f.writeln(&format!(
            "bits.store {}, {} {{offset = {}, width = {}}}",
            value.render(k),
            access(k, *tensor, indices),
            offset.render(k),
            width
        )),
        AstNode::Block(nodes) => print_body(f, nodes),
    }
}

fn for_header(k: &LoweredKernel, l: &AstFor) -> String {
    let mut header = format!(
        "affine.for %{} = {} to {}",
        k.var_name(l.var),
        index(k, &l.lower),
        index(k, &l.upper)
    );
    if l.step != 1 {
        header.push_str(&format!(" step {}", l.step));
    }
    header
}

fn for_attributes(l: &AstFor) -> String {
    let mut attrs = Vec::new();
    if let Some(stage) = &l.stage {
        attrs.push(format!("stage = \"{}\"", stage));
    }
    if let Some(factor) = l.unroll {
        attrs.push(format!("unroll = {}", factor));
    }
    if attrs.is_empty() {
        String::new()
    } else {
        format!(" {{{}}}", format_list(&attrs, ", "))
    }
}

fn index(k: &LoweredKernel, e: &IndexExpr) -> String {
    e.to_string_with_names(&|v| format!("%{}", k.var_name(v)))
}

fn access(k: &LoweredKernel, tensor: TensorId, indices: &[Expr]) -> String {
    let idx: Vec<String> = indices.iter().map(|i| i.render(k)).collect();
    format!("%{}[{}]", k.tensor_name(tensor), idx.join(", "))
}

fn element_type(ty: &ValueType) -> String {
    match ty {
        ValueType::Int(b) => format!("i{}", b),
        ValueType::UInt(b) => format!("ui{}", b),
        ValueType::Float(b) => format!("f{}", b),
        other => other.to_string(),
    }
}

fn memref_type(t: &TensorInfo) -> String {
    let mut dims: Vec<String> = t.shape.iter().map(|d| d.to_string()).collect();
    dims.push(element_type(&t.dtype));
    format!("memref<{}>", dims.join("x"))
}

impl LoweredKernel {
    /// Header line of a loop node, e.g. `affine.for %i0 = 0 to 10`.
    pub fn loop_header(&self, node: &AstNode) -> Option<String> {
        node.as_for().map(|l| for_header(self, l))
    }
}

impl fmt::Display for LoweredKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Printer::new(self).print())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{TensorKind, VarId, VarInfo};
    use pretty_assertions::assert_eq;

    fn kernel(body: Vec<AstNode>) -> LoweredKernel {
        let tensor = |id: u32, name: &str| TensorInfo {
            id: TensorId(id),
            name: name.to_string(),
            shape: vec![4],
            dtype: ValueType::Int(32),
            kind: TensorKind::Placeholder,
        };
        LoweredKernel {
            name: "k".to_string(),
            tensors: vec![tensor(0, "A"), tensor(1, "T")],
            args: vec![TensorId(0)],
            vars: vec![VarInfo { name: "i".to_string(), ty: ValueType::Int(32) }],
            body,
        }
    }

    #[test]
    fn test_print_loop_with_attributes() {
        let i = Expr::var(VarId(0), ValueType::Int(32));
        let k = kernel(vec![AstNode::For(AstFor {
            var: VarId(0),
            lower: IndexExpr::constant(0),
            upper: IndexExpr::constant(4),
            step: 2,
            unroll: Some(2),
            stage: Some("S".to_string()),
            body: vec![AstNode::Store { tensor: TensorId(1), indices: vec![i.clone()], value: i }],
        })]);
        let expected = "func @k(%A: memref<4xi32>) {\n  \
            %T = memref.alloc() : memref<4xi32>\n  \
            affine.for %i = 0 to 4 step 2 {\n    \
            affine.store %i, %T[%i]\n  \
            } {stage = \"S\", unroll = 2}\n\
            }\n";
        assert_eq!(k.to_string(), expected);
        assert_eq!(k.loop_header(&k.body()[0]).as_deref(), Some("affine.for %i = 0 to 4 step 2"));
    }

    #[test]
    fn test_print_if_chain() {
        let a = Expr::var(VarId(0), ValueType::Int(32));
        let store = |v: i64| AstNode::Store { tensor: TensorId(0), indices: vec![Expr::int(0)], value: Expr::int(v) };
        let k = kernel(vec![AstNode::If {
            branches: vec![(a.lt(1), vec![store(1)]), (a.lt(2), vec![store(2)])],
            else_body: Some(vec![store(3)]),
        }]);
        let text = k.to_string();
        assert!(text.contains("scf.if (%i < 1) {\n    affine.store 1, %A[0]\n  } elif (%i < 2) {"));
        assert!(text.contains("} else {\n    affine.store 3, %A[0]\n  }\n"));
    }
}
