#[cfg(feature = "debug")]
use crate::{LinkId, NodeId, RoadConnectionId};
#[cfg(feature = "debug")]
use serde_json::json;

#[cfg(feature = "debug")]
thread_local!(
    static DEBUG_FRAME: std::cell::RefCell<Vec<serde_json::Value>> = Default::default();
);

/// Records the flows a node resolved this step.
#[cfg(feature = "debug")]
pub fn debug_node_flows(
    node: NodeId,
    flows: impl Iterator<Item = (RoadConnectionId, LinkId, f64)>,
) {
    let flows = flows
        .map(|(rc, outlink, flow)| {
            json!({
                "road_connection": format!("{:?}", rc),
                "outlink": format!("{:?}", outlink),
                "flow": flow,
            })
        })
        .collect::<Vec<_>>();
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "node",
            "node": format!("{:?}", node),
            "flows": flows,
        }))
    })
}

/// Records the vehicles waiting at a source.
#[cfg(feature = "debug")]
pub fn debug_backlog(link: LinkId, backlog: f64) {
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "backlog",
            "link": format!("{:?}", link),
            "vehicles": backlog,
        }))
    })
}

#[cfg(feature = "debug")]
pub fn take_debug_frame() -> serde_json::Value {
    json!(DEBUG_FRAME.with(|frame| frame.take()))
}
