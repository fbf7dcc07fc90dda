//! Parameter dump
//!
//! Serializes every resident processor's parameter descriptors into a
//! JSON document, the shape remote frontends consume to build their
//! control surfaces.

use reef_engine::Controller;
use serde_json::{json, Value};

pub fn dump_parameters(controller: &Controller) -> Value {
    let registry = controller.engine().registry();
    let mut processors = Vec::new();
    for entry in registry.all_in_order() {
        let parameters: Vec<Value> = entry
            .descriptors
            .iter()
            .map(|descriptor| {
                json!({
                    "index": descriptor.index,
                    "name": descriptor.name,
                    "label": descriptor.label,
                    "unit": descriptor.unit,
                    "type": descriptor.kind,
                    "min": descriptor.min,
                    "max": descriptor.max,
                })
            })
            .collect();
        processors.push(json!({
            "id": entry.id.raw(),
            "name": entry.name,
            "label": entry.label,
            "is_track": entry.is_track,
            "channels": entry.channels,
            "parameters": parameters,
        }));
    }
    json!({ "processors": processors })
}
