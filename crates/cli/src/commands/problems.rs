use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use crashvault_core::model::ItemKind;

use crate::commands::{layout_for, open_problem_service, print_json};
use crate::parse_field;

/// Show a problem's elements; all of them when `elements` is empty.
pub fn info_command(
    root: &str,
    dir: &str,
    uid: u32,
    elements: &[String],
    json: bool,
) -> Result<()> {
    let layout = layout_for(root)?;
    let service = open_problem_service(&layout)?;

    if elements.is_empty() {
        let record =
            service.get_full_record(dir, uid).with_context(|| format!("Failed to read {dir}"))?;
        if json {
            return print_json(&record, "problem");
        }
        for (name, item) in record.iter() {
            match item.kind {
                ItemKind::Binary => println!("{name}: (binary) {}", item.content),
                _ if item.content.contains('\n') => {
                    println!("{name}:\n{}", item.content.trim_end_matches('\n'))
                }
                _ => println!("{name}: {}", item.content),
            }
        }
        return Ok(());
    }

    let names: Vec<&str> = elements.iter().map(String::as_str).collect();
    let info = service.get_info(dir, &names, uid).with_context(|| format!("Failed to read {dir}"))?;
    if json {
        return print_json(&info, "problem info");
    }
    for (name, value) in info {
        println!("{name}: {}", value.trim_end_matches('\n'));
    }
    Ok(())
}

/// Create a problem directory from `name=value` fields.
pub fn new_problem_command(root: &str, fields: &[String], uid: u32) -> Result<()> {
    let layout = layout_for(root)?;
    let service = open_problem_service(&layout)?;
    let mut parsed = BTreeMap::new();
    for field in fields {
        let (name, value) = parse_field(field)?;
        parsed.insert(name, value);
    }
    let id = service.new_problem(&parsed, uid).context("Failed to create problem")?;
    println!("{id}");
    Ok(())
}

pub fn set_element_command(root: &str, dir: &str, uid: u32, field: &str) -> Result<()> {
    let layout = layout_for(root)?;
    let service = open_problem_service(&layout)?;
    let (name, value) = parse_field(field)?;
    service
        .set_element(dir, &name, &value, uid)
        .with_context(|| format!("Failed to set {name} in {dir}"))?;
    println!("Set {name} in {dir}");
    Ok(())
}

pub fn delete_element_command(root: &str, dir: &str, uid: u32, name: &str) -> Result<()> {
    let layout = layout_for(root)?;
    let service = open_problem_service(&layout)?;
    let existed = service
        .delete_element(dir, name, uid)
        .with_context(|| format!("Failed to delete {name} from {dir}"))?;
    if !existed {
        return Err(anyhow!("Element {name} does not exist in {dir}"));
    }
    println!("Deleted {name} from {dir}");
    Ok(())
}
