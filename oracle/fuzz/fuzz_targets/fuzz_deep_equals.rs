#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use oracle::{deep_equals, Value};
use std::collections::BTreeMap;

#[derive(Arbitrary, Debug)]
enum Shape {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Function,
    Array(Vec<Shape>),
    RegExp(String),
    Object(String, Option<Box<Shape>>, Vec<(String, Shape)>),
}

fn build(shape: &Shape, depth: usize) -> Value {
    if depth > 8 {
        return Value::Undefined;
    }
    match shape {
        Shape::Undefined => Value::Undefined,
        Shape::Null => Value::Null,
        Shape::Bool(b) => Value::Bool(*b),
        Shape::Number(n) => Value::Number(*n),
        Shape::String(s) => Value::String(s.clone()),
        Shape::Function => Value::Function,
        Shape::Array(items) => Value::Array(items.iter().map(|s| build(s, depth + 1)).collect()),
        Shape::RegExp(s) => Value::RegExp(s.clone()),
        Shape::Object(class, primitive, props) => Value::Object {
            class: class.clone(),
            primitive: primitive.as_ref().map(|p| Box::new(build(p, depth + 1))),
            properties: props
                .iter()
                .map(|(k, v)| (k.clone(), build(v, depth + 1)))
                .collect::<BTreeMap<_, _>>(),
        },
    }
}

// Equality must be reflexive and symmetric for every observable value.
fuzz_target!(|input: (Shape, Shape)| {
    let a = build(&input.0, 0);
    let b = build(&input.1, 0);
    assert!(deep_equals(&a, &a));
    assert!(deep_equals(&b, &b));
    assert_eq!(deep_equals(&a, &b), deep_equals(&b, &a));
});
