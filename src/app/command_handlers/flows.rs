use crate::app::command_support::load_config;
use crate::orchestration::flow_graph::FlowGraph;
use crate::orchestration::sidequest::SidequestCatalog;

pub fn cmd_validate(args: &[String]) -> Result<String, String> {
    if args.len() != 1 {
        return Err("usage: validate <config>".to_string());
    }
    let config = load_config(&args[0])?;
    let graph = FlowGraph::from_config(&config).map_err(|e| e.to_string())?;
    let catalog = SidequestCatalog::from_config(&config, &graph).map_err(|e| e.to_string())?;
    Ok(format!(
        "ok: {} flows, {} sidequests",
        graph.flows().count(),
        catalog.len()
    ))
}

pub fn cmd_flows(args: &[String]) -> Result<String, String> {
    if args.len() != 1 {
        return Err("usage: flows <config>".to_string());
    }
    let config = load_config(&args[0])?;
    let graph = FlowGraph::from_config(&config).map_err(|e| e.to_string())?;
    let mut lines = Vec::new();
    for flow in graph.flows() {
        let terminals = flow
            .terminals()
            .into_iter()
            .map(|(node, kind)| format!("{node}({kind})"))
            .collect::<Vec<_>>()
            .join(",");
        let injectable = graph
            .injectable_flows(&flow.key)
            .into_iter()
            .map(|key| key.to_string())
            .collect::<Vec<_>>();
        lines.push(format!(
            "{} entry={} terminals={} injectable={}",
            flow.key,
            flow.entry,
            terminals,
            if injectable.is_empty() {
                "-".to_string()
            } else {
                injectable.join(",")
            }
        ));
    }
    Ok(lines.join("\n"))
}
