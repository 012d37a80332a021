//! Writing staged rows back.
//!
//! In place, the source table is updated from staging joined on the primary
//! key, so only staged rows change. Otherwise `target_schema.table` is
//! recreated from staging: flat columns are copied as they are, and every
//! column transformed through nested paths is rebuilt as a JSON object
//! holding exactly the transformed leaves, read from the staged value with
//! `->` operators. Attributes of a nested column that no field touches are
//! not carried over.

use crate::Result;
use crate::path::{FieldPath, PathSegment, PathTree};
use crate::pipeline::TablePlan;
use crate::schema::Materialization;
use crate::sql::{self, quote_ident, quote_literal};
use crate::store::AnonymizationStore;

/// Applies the staged rows of `plan` according to its materialization mode.
pub async fn apply<S>(store: &mut S, plan: &TablePlan) -> Result<()>
where
    S: AnonymizationStore + ?Sized,
{
    let staging = plan.staging_table();
    match plan.materialization() {
        Materialization::InPlace => {
            tracing::info!("Applying changes on table '{}'", plan.table());
            store
                .execute(&sql::create_index(&staging, plan.primary_key()))
                .await?;
            store
                .execute(&sql::update_from_staging(
                    plan.table(),
                    &staging,
                    plan.primary_key(),
                    plan.columns(),
                ))
                .await
        }
        Materialization::NewTable { target_schema } => {
            let target = sql::qualified(target_schema, plan.table());
            tracing::info!("Creating {} from '{}'", target, plan.table());
            let expressions = new_table_columns(plan)?;
            store.execute(&sql::drop_table_if_exists(&target)).await?;
            store
                .execute(&sql::create_table_as(&target, &expressions, &staging))
                .await
        }
    }
}

/// Select list of a new materialized table: primary key, flat columns, then
/// one rebuilt object per nested column.
pub fn new_table_columns(plan: &TablePlan) -> Result<Vec<String>> {
    let paths: Vec<&FieldPath> = plan
        .transformer()
        .fields()
        .iter()
        .map(|field| field.path())
        .collect();

    let mut flat = vec![quote_ident(plan.primary_key())];
    let mut nested = Vec::new();
    for column in plan.columns() {
        let column_paths: Vec<&FieldPath> = paths
            .iter()
            .copied()
            .filter(|path| path.root() == column && path.is_nested())
            .collect();
        if column_paths.is_empty() {
            flat.push(quote_ident(column));
            continue;
        }

        let tree = PathTree::build(column_paths);
        let Some(node) = tree.member(column) else {
            continue;
        };
        nested.push(format!("{} AS {}", node_expression(node)?, quote_ident(column)));
    }

    flat.extend(nested);
    Ok(flat)
}

fn node_expression(node: &PathTree) -> Result<String> {
    match node {
        PathTree::Leaf(path) => Ok(leaf_reference(&FieldPath::parse(path)?)),
        PathTree::Object(members) => {
            let arguments = members
                .iter()
                .map(|(key, child)| Ok(format!("{}, {}", quote_literal(key), node_expression(child)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("json_build_object({})", arguments.join(", ")))
        }
        PathTree::Array(items) => {
            let arguments = items
                .iter()
                .map(node_expression)
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("json_build_array({})", arguments.join(", ")))
        }
    }
}

/// `"root"->'a'->0->'b'` for `root.a[0].b`.
fn leaf_reference(path: &FieldPath) -> String {
    let mut reference = String::new();
    for (position, segment) in path.segments().iter().enumerate() {
        if position == 0 {
            reference.push_str(&quote_ident(segment.key()));
        } else {
            reference.push_str("->");
            reference.push_str(&quote_literal(segment.key()));
        }
        if let PathSegment::Index { index, .. } = segment {
            reference.push_str(&format!("->{}", index));
        }
    }
    reference
}
