use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use crate::ast::*;
use crate::codegen::{AttrPlan, Op, Program, SubTemplate};
use crate::error::{Error, Position, RenderError};
use crate::runtime::{class_list, escape_attr, escape_html, style_string};
use crate::value::{Function, Value};

/// Nested mixin and sub-template invocations allowed before giving up.
pub const MAX_DEPTH: usize = 128;

/// Variables of one render. Flat: `if` and `each` bodies write to the same
/// map, so assignments stay visible after the construct.
#[derive(Debug, Default)]
pub struct Scope {
    vars: HashMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.vars.insert(name.into(), value)
    }

    fn restore(&mut self, name: &str, previous: Option<Value>) {
        match previous {
            Some(value) => {
                self.vars.insert(name.to_string(), value);
            }
            None => {
                self.vars.remove(name);
            }
        }
    }
}

pub struct Evaluator<'t> {
    program: &'t Program,
    overrides: &'t BTreeMap<String, SubTemplate>,
    functions: &'t BTreeMap<String, Function>,
    root: &'t Value,
    scope: Scope,
    path: &'t str,
    depth: usize,
    out: String,
}

impl<'t> Evaluator<'t> {
    pub fn new(
        program: &'t Program,
        overrides: &'t BTreeMap<String, SubTemplate>,
        functions: &'t BTreeMap<String, Function>,
        root: &'t Value,
    ) -> Self {
        Self {
            program,
            overrides,
            functions,
            root,
            scope: Scope::new(),
            path: &program.name,
            depth: 0,
            out: String::new(),
        }
    }

    /// Runs the main sequence and returns the produced HTML.
    pub fn render(mut self) -> Result<String, Error> {
        let program = self.program;
        self.exec(&program.ops)?;
        Ok(self.out)
    }

    fn fail(&self, pos: Position, source: RenderError) -> Error {
        Error::Render {
            path: self.path.to_string(),
            pos,
            source,
        }
    }

    fn eval_at(&self, expr: &Expr, pos: Position) -> Result<Value, Error> {
        self.eval(expr).map_err(|err| self.fail(pos, err))
    }

    fn exec(&mut self, ops: &'t [Op]) -> Result<(), Error> {
        for op in ops {
            match op {
                Op::Literal(text) => self.out.push_str(text),
                Op::Emit { expr, escaped, pos } => {
                    let text = self.eval_at(expr, *pos)?.to_string();
                    if *escaped {
                        self.out.push_str(&escape_html(&text));
                    } else {
                        self.out.push_str(&text);
                    }
                }
                Op::OpenTag {
                    name,
                    attrs,
                    self_closing,
                    ..
                } => {
                    self.out.push('<');
                    self.out.push_str(name);
                    for attr in attrs {
                        self.render_attr(attr)?;
                    }
                    self.out.push_str(if *self_closing { " />" } else { ">" });
                }
                Op::Branch {
                    cond,
                    negated,
                    then_ops,
                    else_ops,
                    pos,
                } => {
                    if self.eval_at(cond, *pos)?.is_truthy() != *negated {
                        self.exec(then_ops)?;
                    } else {
                        self.exec(else_ops)?;
                    }
                }
                Op::Loop {
                    item,
                    index,
                    collection,
                    body,
                    pos,
                } => {
                    let collection = self.eval_at(collection, *pos)?;
                    self.exec_loop(item, index.as_deref(), collection, body, *pos)?;
                }
                Op::Assign { name, expr, pos } => {
                    let value = self.eval_at(expr, *pos)?;
                    self.scope.set(name.clone(), value);
                }
                Op::InvokeMixin { name, args, pos } => self.invoke_mixin(name, args, *pos)?,
                Op::InvokeSub { path, pos } => self.invoke_sub(path, *pos)?,
            }
        }
        Ok(())
    }

    fn exec_loop(
        &mut self,
        item: &str,
        index: Option<&str>,
        collection: Value,
        body: &'t [Op],
        pos: Position,
    ) -> Result<(), Error> {
        let entries: Vec<(Value, Value)> = match collection {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (v, Value::from(i)))
                .collect(),
            Value::Map(map) => map.into_iter().map(|(k, v)| (v, Value::String(k))).collect(),
            other => {
                return Err(self.fail(pos, RenderError::NotIterable { kind: other.kind() }))
            }
        };
        let saved_item = self.scope.get(item).cloned();
        let saved_index = index.map(|name| self.scope.get(name).cloned());
        let mut result = Ok(());
        for (value, key) in entries {
            self.scope.set(item, value);
            if let Some(name) = index {
                self.scope.set(name, key);
            }
            result = self.exec(body);
            if result.is_err() {
                break;
            }
        }
        self.scope.restore(item, saved_item);
        if let (Some(name), Some(previous)) = (index, saved_index) {
            self.scope.restore(name, previous);
        }
        result
    }

    fn enter(&mut self, pos: Position) -> Result<(), Error> {
        if self.depth >= MAX_DEPTH {
            return Err(self.fail(pos, RenderError::RecursionLimit { limit: MAX_DEPTH }));
        }
        self.depth += 1;
        Ok(())
    }

    /// Runs `ops` with a fresh scope, attributing errors to `path`.
    fn exec_isolated(&mut self, path: &'t str, scope: Scope, ops: &'t [Op]) -> Result<(), Error> {
        let saved_scope = std::mem::replace(&mut self.scope, scope);
        let saved_path = std::mem::replace(&mut self.path, path);
        let result = self.exec(ops);
        self.scope = saved_scope;
        self.path = saved_path;
        self.depth -= 1;
        result
    }

    fn invoke_mixin(&mut self, name: &str, args: &[Expr], pos: Position) -> Result<(), Error> {
        let program = self.program;
        let Some(mixin) = program.mixins.get(name) else {
            return Err(self.fail(
                pos,
                RenderError::UnknownMixin {
                    name: name.to_string(),
                },
            ));
        };
        let mut values = args
            .iter()
            .map(|arg| self.eval_at(arg, pos))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter();
        let mut scope = Scope::new();
        for param in &mixin.params {
            scope.set(param.clone(), values.next().unwrap_or_default());
        }
        self.enter(pos)?;
        trace!(mixin = %name, depth = self.depth, "invoking mixin");
        self.exec_isolated(&mixin.path, scope, &mixin.body)
    }

    fn invoke_sub(&mut self, path: &str, pos: Position) -> Result<(), Error> {
        let overrides = self.overrides;
        let program = self.program;
        let Some((key, sub)) = overrides
            .get_key_value(path)
            .or_else(|| program.sub_templates.get_key_value(path))
        else {
            return Err(self.fail(
                pos,
                RenderError::UnresolvedSubTemplate {
                    path: path.to_string(),
                },
            ));
        };
        match sub {
            SubTemplate::Raw(text) => {
                self.out.push_str(text);
                Ok(())
            }
            SubTemplate::Compiled(ops) => {
                self.enter(pos)?;
                self.exec_isolated(key, Scope::new(), ops)
            }
        }
    }

    fn render_attr(&mut self, attr: &AttrPlan) -> Result<(), Error> {
        match attr {
            AttrPlan::Boolean(name) => {
                self.out.push(' ');
                self.out.push_str(name);
            }
            AttrPlan::Value {
                name,
                expr,
                escaped,
                pos,
            } => {
                let value = self.eval_at(expr, *pos)?;
                match value {
                    Value::Null | Value::Bool(false) => {}
                    Value::Bool(true) => {
                        self.out.push(' ');
                        self.out.push_str(name);
                    }
                    value => {
                        let text = if name == "style" {
                            style_string(&value)
                        } else {
                            value.to_string()
                        };
                        let text = if *escaped { escape_attr(&text) } else { text };
                        self.push_attr(name, &text);
                    }
                }
            }
            AttrPlan::Class { shorthand, values } => {
                let mut classes = shorthand.clone();
                for (expr, pos) in values {
                    classes.extend(class_list(&self.eval_at(expr, *pos)?));
                }
                self.push_attr("class", &escape_attr(&classes.join(" ")));
            }
            AttrPlan::Id { shorthand, value } => {
                let id = match (value, shorthand) {
                    (Some((expr, pos)), _) => self.eval_at(expr, *pos)?.to_string(),
                    (None, Some(id)) => id.clone(),
                    (None, None) => return Ok(()),
                };
                self.push_attr("id", &escape_attr(&id));
            }
        }
        Ok(())
    }

    fn push_attr(&mut self, name: &str, value: &str) {
        self.out.push(' ');
        self.out.push_str(name);
        self.out.push_str("=\"");
        self.out.push_str(value);
        self.out.push('"');
    }

    fn lookup(&self, name: &str) -> Result<Value, RenderError> {
        if let Some(value) = self.scope.get(name) {
            return Ok(value.clone());
        }
        if let Value::Map(map) = self.root {
            if let Some(value) = map.get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(func) = self.functions.get(name) {
            return Ok(Value::Func(func.clone()));
        }
        Err(RenderError::UndefinedIdentifier {
            name: name.to_string(),
        })
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, RenderError> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::Nil => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(x) => Value::Float(*x),
                Literal::Str(s) => Value::String(s.clone()),
            }),
            Expr::Ident(name) => self.lookup(name),
            Expr::Binary(BinOp::And, l, r) => {
                Ok(Value::Bool(self.eval(l)?.is_truthy() && self.eval(r)?.is_truthy()))
            }
            Expr::Binary(BinOp::Or, l, r) => {
                Ok(Value::Bool(self.eval(l)?.is_truthy() || self.eval(r)?.is_truthy()))
            }
            Expr::Binary(op, l, r) => binary(*op, self.eval(l)?, self.eval(r)?),
            Expr::Unary(UnaryOp::Not, e) => Ok(Value::Bool(!self.eval(e)?.is_truthy())),
            Expr::Unary(UnaryOp::Neg, e) => match self.eval(e)? {
                Value::Int(i) => Ok(i
                    .checked_neg()
                    .map_or(Value::Float(-(i as f64)), Value::Int)),
                Value::Float(x) => Ok(Value::Float(-x)),
                other => Err(RenderError::TypeMismatch {
                    op: "-",
                    left: "nothing",
                    right: other.kind(),
                }),
            },
            Expr::Ternary(c, t, e) => {
                if self.eval(c)?.is_truthy() {
                    self.eval(t)
                } else {
                    self.eval(e)
                }
            }
            Expr::Index(base, key) => index(self.eval(base)?, self.eval(key)?),
            Expr::Field(base, name) => field(self.eval(base)?, name),
            Expr::Call(callee, args) => {
                let callee = self.eval(callee)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                call(&callee, &args)
            }
            Expr::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Map(entries) => Ok(Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.eval(v)?)))
                    .collect::<Result<_, RenderError>>()?,
            )),
        }
    }
}

fn call(callee: &Value, args: &[Value]) -> Result<Value, RenderError> {
    match callee {
        Value::Func(func) => func.call(args).map_err(|message| RenderError::Function {
            name: func.name().to_string(),
            message,
        }),
        other => Err(RenderError::NotCallable { kind: other.kind() }),
    }
}

fn field(base: Value, name: &str) -> Result<Value, RenderError> {
    match base {
        Value::Map(mut map) => Ok(map.remove(name).unwrap_or_default()),
        Value::Func(_) => field(call(&base, &[])?, name),
        other => Err(RenderError::InapplicableAccess {
            access: format!("field `{name}`"),
            kind: other.kind(),
        }),
    }
}

fn index(base: Value, key: Value) -> Result<Value, RenderError> {
    match (base, key) {
        (Value::Array(mut items), Value::Int(i)) => {
            let len = items.len();
            match usize::try_from(i) {
                Ok(at) if at < len => Ok(items.swap_remove(at)),
                _ => Err(RenderError::IndexOutOfBounds { index: i, len }),
            }
        }
        (Value::String(s), Value::Int(i)) => {
            let len = s.chars().count();
            usize::try_from(i)
                .ok()
                .and_then(|at| s.chars().nth(at))
                .map(|c| Value::String(c.to_string()))
                .ok_or(RenderError::IndexOutOfBounds { index: i, len })
        }
        (Value::Map(mut map), key) => Ok(map.remove(&key.to_string()).unwrap_or_default()),
        (base, key) => Err(RenderError::InapplicableAccess {
            access: format!("index {}", key.kind()),
            kind: base.kind(),
        }),
    }
}

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value, RenderError> {
    let mismatch = |l: &Value, r: &Value| RenderError::TypeMismatch {
        op: op.symbol(),
        left: l.kind(),
        right: r.kind(),
    };
    match op {
        BinOp::Eq => Ok(Value::Bool(equals(&l, &r))),
        BinOp::Ne => Ok(Value::Bool(!equals(&l, &r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(&l, &r).ok_or_else(|| mismatch(&l, &r))?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering == Ordering::Less,
                BinOp::Le => ordering != Ordering::Greater,
                BinOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinOp::Add if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) => {
            Ok(Value::String(format!("{l}{r}")))
        }
        _ => arithmetic(op, &l, &r).ok_or_else(|| mismatch(&l, &r))?,
    }
}

/// `None` when the operands are not both numeric.
fn arithmetic(op: BinOp, l: &Value, r: &Value) -> Option<Result<Value, RenderError>> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            if matches!(op, BinOp::Div | BinOp::Rem) && b == 0 {
                return Some(Err(RenderError::DivisionByZero));
            }
            let exact = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => a.checked_div(b),
                BinOp::Rem => a.checked_rem(b),
                _ => return None,
            };
            // Overflow falls back to float arithmetic.
            match exact {
                Some(v) => Some(Ok(Value::Int(v))),
                None => float_op(op, a as f64, b as f64),
            }
        }
        _ => float_op(op, as_float(l)?, as_float(r)?),
    }
}

fn float_op(op: BinOp, a: f64, b: f64) -> Option<Result<Value, RenderError>> {
    if matches!(op, BinOp::Div | BinOp::Rem) && b == 0.0 {
        return Some(Err(RenderError::DivisionByZero));
    }
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Rem => a % b,
        _ => return None,
    };
    Some(Ok(Value::Float(v)))
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            as_float(l) == as_float(r)
        }
        _ => l == r,
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => as_float(l)?.partial_cmp(&as_float(r)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expression;
    use crate::lexer::Source;

    fn eval_with(src: &str, root: &Value) -> Result<Value, RenderError> {
        let program = Program {
            name: "<test>".into(),
            ops: Vec::new(),
            mixins: BTreeMap::new(),
            sub_templates: BTreeMap::new(),
        };
        let overrides = BTreeMap::new();
        let functions = crate::runtime::builtins();
        let expr = parse_expression(&Source::new(src, Position::new(1, 1))).unwrap();
        Evaluator::new(&program, &overrides, &functions, root).eval(&expr)
    }

    fn eval(src: &str) -> Value {
        eval_with(src, &Value::Null).unwrap()
    }

    #[test]
    fn arithmetic_stays_integral() {
        assert_eq!(eval("2 + 3 * 4"), Value::Int(14));
        assert_eq!(eval("7 / 2"), Value::Int(3));
        assert_eq!(eval("7 % 4"), Value::Int(3));
        assert_eq!(eval("1 + 0.5"), Value::Float(1.5));
        assert_eq!(eval("\"a\" + 1"), Value::from("a1"));
    }

    #[test]
    fn negating_the_smallest_int_falls_back_to_float() {
        let root: Value = [("x", i64::MIN)].into_iter().collect();
        assert_eq!(eval_with("-x", &root), Ok(Value::Float(9223372036854775808.0)));
        assert_eq!(eval_with("-(x + 1)", &root), Ok(Value::Int(i64::MAX)));
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(eval_with("1 / 0", &Value::Null), Err(RenderError::DivisionByZero));
        assert_eq!(eval_with("1 % 0", &Value::Null), Err(RenderError::DivisionByZero));
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval("\"a\" < \"b\""), Value::Bool(true));
        assert_eq!(eval("1 == 1.0"), Value::Bool(true));
        assert_eq!(eval("true && 0"), Value::Bool(false));
        assert_eq!(eval("nil || \"x\""), Value::Bool(true));
        assert!(matches!(
            eval_with("1 < \"a\"", &Value::Null),
            Err(RenderError::TypeMismatch { op: "<", .. })
        ));
    }

    #[test]
    fn short_circuit_skips_undefined_names() {
        assert_eq!(eval("false && missing"), Value::Bool(false));
        assert_eq!(eval("true || missing"), Value::Bool(true));
    }

    #[test]
    fn nested_ternary() {
        let root: Value = [("A", 2), ("B", 3)].into_iter().collect();
        assert_eq!(
            eval_with(r#"B > A ? A > B ? "x" : "y" : "z""#, &root),
            Ok(Value::from("y"))
        );
    }

    #[test]
    fn lookup_order_and_errors() {
        assert_eq!(
            eval_with("missing", &Value::Null),
            Err(RenderError::UndefinedIdentifier {
                name: "missing".into()
            })
        );
        assert_eq!(eval("len(\"abc\")"), Value::Int(3));
    }

    #[test]
    fn access_rules() {
        let make = Function::new("b", |_| Ok([("c", "d")].into_iter().collect()));
        let inner: Value = [("b", Value::Func(make))].into_iter().collect();
        let root: Value = [("a", inner), ("list", Value::from(vec![1, 2]))]
            .into_iter()
            .collect();
        assert_eq!(eval_with("a.b().c", &root), Ok(Value::from("d")));
        assert_eq!(eval_with("a.b.c", &root), Ok(Value::from("d")));
        assert_eq!(eval_with("a.nope", &root), Ok(Value::Null));
        assert_eq!(eval_with("list[1]", &root), Ok(Value::Int(2)));
        assert_eq!(
            eval_with("list[2]", &root),
            Err(RenderError::IndexOutOfBounds { index: 2, len: 2 })
        );
        assert!(matches!(
            eval_with("list.x", &root),
            Err(RenderError::InapplicableAccess { kind: "array", .. })
        ));
        assert_eq!(eval_with("\"héllo\"[1]", &root), Ok(Value::from("é")));
        assert!(matches!(
            eval_with("list()", &root),
            Err(RenderError::NotCallable { kind: "array" })
        ));
    }

    #[test]
    fn loop_bindings_are_restored() {
        let mut scope = Scope::new();
        scope.set("v", Value::Int(1));
        let previous = scope.set("v", Value::Int(2));
        scope.restore("v", previous);
        assert_eq!(scope.get("v"), Some(&Value::Int(1)));
        scope.restore("v", None);
        assert_eq!(scope.get("v"), None);
    }
}
