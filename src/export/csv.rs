use crate::error::Error;
use crate::error::Result;
use crate::store::Store;
use crate::study::Filter;

/// one row per trial with a fixed leading column set, then the
/// study's parameters in name order. comma delimiter, double-quote
/// quoting, newline row endings, full-precision numerics.
pub async fn to_csv(store: &dyn Store, study_id: &str) -> Result<String> {
    let study = store
        .get_study(study_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("study {}", study_id)))?;
    let trials = store.list_trials(study_id, Filter::all()).await?;
    let names = study.space.names().cloned().collect::<Vec<_>>();
    let mut out = String::new();
    let header = ["trial_id", "status", "value", "started_at", "completed_at"]
        .into_iter()
        .map(str::to_string)
        .chain(names.iter().cloned())
        .collect::<Vec<_>>();
    row(&mut out, &header);
    for trial in &trials {
        let mut cells = vec![
            trial.id.clone(),
            trial.status.to_string(),
            trial.value.map(|v| v.to_string()).unwrap_or_default(),
            trial.started_at.to_rfc3339(),
            trial
                .completed_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        ];
        for name in &names {
            cells.push(
                trial
                    .params
                    .get(name)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        row(&mut out, &cells);
    }
    Ok(out)
}

fn row(out: &mut String, cells: &[String]) {
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&quote(cell));
    }
    out.push('\n');
}

/// quote only when the cell needs it.
fn quote(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
