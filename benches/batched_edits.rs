use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use schema_form::Form;
use serde_json::{json, Value};

fn invoice_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "customer": {
                "type": "object",
                "properties": {
                    "name": { "type": "string", "minLength": 2 },
                    "kind": { "type": "string", "enum": ["personal", "business"] },
                    "vat": {
                        "type": "string",
                        "computed": {
                            "visible": { "expression": "deps[0] == \"business\"", "dependencies": ["../kind"] }
                        }
                    }
                },
                "required": ["name"]
            },
            "lines": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "sku": { "type": "string" },
                        "qty": { "type": "integer", "minimum": 1 }
                    },
                    "required": ["sku"]
                }
            }
        }
    })
}

fn invoice_value(lines: usize) -> Value {
    let lines: Vec<Value> = (0..lines)
        .map(|i| json!({ "sku": format!("SKU-{}", i), "qty": 1 }))
        .collect();
    json!({ "customer": { "name": "Ada", "kind": "personal" }, "lines": lines })
}

fn benchmark_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for lines in [10usize, 100] {
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &lines, |b, &lines| {
            b.iter(|| Form::new(invoice_schema(), Some(invoice_value(lines))).unwrap())
        });
    }
    group.finish();
}

fn benchmark_batched_edits(c: &mut Criterion) {
    let mut form = Form::new(invoice_schema(), Some(invoice_value(50))).unwrap();
    let _subscription = form.subscribe("customer.name", |event| {
        black_box(event);
    })
    .unwrap();

    let mut group = c.benchmark_group("edits");
    group.throughput(Throughput::Elements(20));
    group.bench_function("twenty_edits_one_flush", |b| {
        b.iter(|| {
            for i in 0..20 {
                form.set_value("customer.name", json!(format!("Name {}", i))).unwrap();
            }
            black_box(form.flush())
        })
    });
    group.bench_function("dependency_toggle", |b| {
        let mut business = false;
        b.iter(|| {
            business = !business;
            let kind = if business { "business" } else { "personal" };
            form.set_value("customer.kind", json!(kind)).unwrap();
            black_box(form.flush())
        })
    });
    group.finish();
}

fn benchmark_array_resize(c: &mut Criterion) {
    let mut form = Form::new(invoice_schema(), Some(invoice_value(10))).unwrap();
    let short = invoice_value(10)["lines"].clone();
    let long = invoice_value(60)["lines"].clone();

    c.bench_function("array_resize", |b| {
        b.iter(|| {
            form.set_value("lines", long.clone()).unwrap();
            form.set_value("lines", short.clone()).unwrap();
            black_box(form.flush())
        })
    });
}

criterion_group!(benches, benchmark_build, benchmark_batched_edits, benchmark_array_resize);
criterion_main!(benches);
