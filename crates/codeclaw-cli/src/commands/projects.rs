//! Project listing and the connected-project selection

use anyhow::{Context, Result};
use codeclaw_core::{load_sessions, ProjectSelection, SourceAdapter};
use codeclaw_storage::{GateState, Session};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tabled::{Table, Tabled};

use super::export::{dedupe_by_id, scoped_adapters};
use super::helpers::{print_heading, Workspace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub name: String,
    pub sessions: usize,
    pub excluded: bool,
    pub connected: bool,
    pub sources: BTreeSet<String>,
}

#[derive(Tabled)]
struct ProjectRow {
    #[tabled(rename = "Project")]
    name: String,
    #[tabled(rename = "Sessions")]
    sessions: usize,
    #[tabled(rename = "Excluded")]
    excluded: &'static str,
    #[tabled(rename = "Connected")]
    connected: &'static str,
    #[tabled(rename = "Source")]
    source: String,
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

impl From<&ProjectInfo> for ProjectRow {
    fn from(info: &ProjectInfo) -> Self {
        Self {
            name: info.name.clone(),
            sessions: info.sessions,
            excluded: yes_no(info.excluded),
            connected: yes_no(info.connected),
            source: info.sources.iter().cloned().collect::<Vec<_>>().join(", "),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProjectsArgs {
    pub sources: Vec<String>,
    /// Comma-separated project names to connect
    pub connect: Option<String>,
    /// Comma-separated project names to disconnect
    pub disconnect: Option<String>,
    /// Clear the selection so every project is exported
    pub all: bool,
}

fn scope_mode(state: &GateState) -> &'static str {
    if state.connected_projects.is_empty() {
        "all_projects"
    } else {
        "connected_only"
    }
}

fn eq_project(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// One entry per project found in `sessions`, sorted by name
#[must_use]
pub fn inventory(sessions: &[Session], state: &GateState) -> Vec<ProjectInfo> {
    let mut by_name: BTreeMap<&str, (usize, BTreeSet<String>)> = BTreeMap::new();
    for session in sessions {
        let entry = by_name.entry(session.project.as_str()).or_default();
        entry.0 += 1;
        entry.1.insert(session.source.clone());
    }
    by_name
        .into_iter()
        .map(|(name, (count, sources))| ProjectInfo {
            name: name.to_string(),
            sessions: count,
            excluded: state.excluded_projects.iter().any(|p| eq_project(p, name)),
            connected: state.connected_projects.iter().any(|p| eq_project(p, name)),
            sources,
        })
        .collect()
}

/// Split a comma-separated list into names found in `known` (spelled as
/// they are known) and names that matched nothing
#[must_use]
pub fn resolve_names(list: &str, known: &BTreeSet<String>) -> (BTreeSet<String>, Vec<String>) {
    let mut found = BTreeSet::new();
    let mut unknown = Vec::new();
    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        match known.iter().find(|k| eq_project(k, name)) {
            Some(k) => {
                found.insert(k.clone());
            }
            None => unknown.push(name.to_string()),
        }
    }
    (found, unknown)
}

pub async fn list_projects(
    ws: &Workspace,
    adapters: Vec<Arc<dyn SourceAdapter>>,
) -> Result<Vec<ProjectInfo>> {
    let state = ws.gate().state()?;
    let (sessions, errors) = tokio::task::spawn_blocking(move || load_sessions(&adapters))
        .await
        .context("Source scan panicked")?;
    for error in &errors {
        log::warn!("{error}");
    }
    Ok(inventory(&dedupe_by_id(sessions), &state))
}

fn warn_unknown(unknown: &[String]) {
    for name in unknown {
        log::warn!("Unknown project {name:?}; ignored");
    }
}

/// Apply the connect/disconnect/all flags in `args` against the projects
/// in `projects`. Returns whether the connected set changed.
pub fn apply_selection(
    ws: &Workspace,
    args: &ProjectsArgs,
    projects: &[ProjectInfo],
) -> Result<bool> {
    let gate = ws.gate();
    let mut changed = false;
    if args.all {
        changed |= gate.select_projects(&ProjectSelection::All)?.1;
    }
    if let Some(list) = &args.disconnect {
        let connected = gate.state()?.connected_projects;
        let (names, unknown) = resolve_names(list, &connected);
        warn_unknown(&unknown);
        if !names.is_empty() {
            changed |= gate.select_projects(&ProjectSelection::Disconnect(names))?.1;
        }
    }
    if let Some(list) = &args.connect {
        let known: BTreeSet<String> = projects.iter().map(|p| p.name.clone()).collect();
        let (names, unknown) = resolve_names(list, &known);
        warn_unknown(&unknown);
        if !names.is_empty() {
            changed |= gate.select_projects(&ProjectSelection::Connect(names))?.1;
        }
    }
    if changed {
        log::info!("Connected projects changed; export again before publishing");
    }
    Ok(changed)
}

pub async fn handle_projects(ws: &Workspace, args: &ProjectsArgs) -> Result<()> {
    let adapters = scoped_adapters(ws, &args.sources)?;
    let mut projects = list_projects(ws, adapters).await?;

    if args.all || args.connect.is_some() || args.disconnect.is_some() {
        apply_selection(ws, args, &projects)?;
        let state = ws.gate().state()?;
        for project in &mut projects {
            project.connected = state
                .connected_projects
                .iter()
                .any(|p| eq_project(p, &project.name));
        }
    }

    let state = ws.gate().state()?;
    print_heading("Projects");
    if projects.is_empty() {
        println!("No sessions found in the configured sources.");
    } else {
        let rows: Vec<ProjectRow> = projects.iter().map(ProjectRow::from).collect();
        println!("{}", Table::new(rows));
    }
    println!("Scope: {}", scope_mode(&state));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeclaw_core::{config::Paths, sources::CanonicalAdapter};
    use codeclaw_storage::Message;

    fn session(id: &str, source: &str, project: &str) -> Session {
        Session::new(
            id,
            source,
            project,
            vec![Message::user("hi"), Message::assistant("Done.")],
        )
    }

    #[test]
    fn test_inventory_groups_by_project() {
        let mut state = GateState::default();
        state.excluded_projects.insert("Client-X".to_string());
        state.connected_projects.insert("app".to_string());

        let projects = inventory(
            &[
                session("1", "claude", "app"),
                session("2", "canonical", "app"),
                session("3", "claude", "client-x"),
            ],
            &state,
        );
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].name, "app");
        assert_eq!(projects[0].sessions, 2);
        assert!(projects[0].connected);
        assert_eq!(projects[0].sources.len(), 2);
        assert!(projects[1].excluded);
        assert!(!projects[1].connected);
        assert_eq!(scope_mode(&state), "connected_only");
        assert_eq!(scope_mode(&GateState::default()), "all_projects");
    }

    #[test]
    fn test_resolve_names() {
        let known: BTreeSet<String> = ["app".to_string(), "Web".to_string()].into_iter().collect();
        let (found, unknown) = resolve_names(" APP, web,,ghost ", &known);
        assert_eq!(found, ["app".to_string(), "Web".to_string()].into_iter().collect());
        assert_eq!(unknown, vec!["ghost".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_and_clear_selection() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::at(Paths::new(dir.path().join("data"))).unwrap();
        let imports = dir.path().join("imports");
        std::fs::create_dir_all(&imports).unwrap();
        for (id, project) in [("a1", "app"), ("w1", "web"), ("w2", "web")] {
            std::fs::write(
                imports.join(format!("{id}.json")),
                serde_json::to_string(&session(id, "canonical", project)).unwrap(),
            )
            .unwrap();
        }
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(CanonicalAdapter::new(&imports))];
        let projects = list_projects(&ws, adapters).await.unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[1].sessions, 2);

        let connect = ProjectsArgs {
            connect: Some("web,ghost".to_string()),
            ..ProjectsArgs::default()
        };
        assert!(apply_selection(&ws, &connect, &projects).unwrap());
        let state = ws.gate().state().unwrap();
        assert_eq!(state.connected_projects, ["web".to_string()].into_iter().collect());

        // Connecting again changes nothing
        assert!(!apply_selection(&ws, &connect, &projects).unwrap());

        let disconnect = ProjectsArgs {
            disconnect: Some("WEB".to_string()),
            ..ProjectsArgs::default()
        };
        assert!(apply_selection(&ws, &disconnect, &projects).unwrap());
        assert!(ws.gate().state().unwrap().connected_projects.is_empty());

        apply_selection(&ws, &connect, &projects).unwrap();
        let all = ProjectsArgs {
            all: true,
            ..ProjectsArgs::default()
        };
        assert!(apply_selection(&ws, &all, &projects).unwrap());
        assert!(ws.gate().state().unwrap().connected_projects.is_empty());
    }
}
