//! anchor-api: REST API for the Anchor control plane.
//!
//! Thin axum layer over [`anchor_orchestrator::Anchor`]: handlers pass path
//! ids, the query multimap and the raw body through to one controller
//! operation and render its outcome.
//!
//! # API Routes
//!
//! All routes are nested under `/api/v1`.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/management/nodes` | List nodes (`?status=`) |
//! | POST | `/management/nodes/register` | Register a node |
//! | GET | `/management/nodes/{id}` | Get a node |
//! | POST | `/management/nodes/{id}/unregister` | Unregister a node |
//! | POST | `/management/nodes/{id}/ping` | Liveness ping |
//! | GET/POST | `/management/nodes/{id}/configuration` | Read / replace node config |
//! | GET | `/management/nodes/{id}/apps` | Apps on a node |
//! | POST | `/management/nodes/{id}/apps/deploy` | Deploy (`?event=<url>`) |
//! | GET/POST/DELETE | `/management/nodes/{id}/apps/{app}` | Get / update info / delete |
//! | POST | `/management/nodes/{id}/apps/{app}/{start,stop,update}` | Lifecycle verb |
//! | GET | `/management/groups` | List groups |
//! | POST | `/management/groups/create` | Create a group |
//! | GET/DELETE | `/management/groups/{id}` | Get / delete a group |
//! | POST | `/management/groups/{id}/{join,leave}` | Membership |
//! | GET | `/management/groups/{id}/apps` | Apps on every member |
//! | POST | `/management/groups/{id}/apps/deploy` | Group deploy |
//! | GET/POST/DELETE | `/management/groups/{id}/apps/{app}` | Group get / update info / delete |
//! | POST | `/management/groups/{id}/apps/{app}/{start,stop,update}` | Group lifecycle verb |
//! | GET | `/management/apps`, `/management/apps/{id}` | App catalogue |
//! | GET | `/search/nodes`, `/search/apps` | Filter search |
//! | GET | `/notification` | List subscribers |
//! | POST | `/notification/register` | Subscribe (query: filter) |
//! | DELETE | `/notification/{id}` | Unsubscribe |
//! | POST | `/notification/{apps,nodes}` | Inbound event from agents |

pub mod handlers;
pub mod notification_handlers;

use std::sync::Arc;

use anchor_orchestrator::Anchor;
use axum::Router;
use axum::routing::{get, post};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub anchor: Arc<Anchor>,
}

/// Build the complete API router.
pub fn build_router(anchor: Arc<Anchor>) -> Router {
    let state = ApiState { anchor };

    let management = Router::new()
        .route("/nodes", get(handlers::list_nodes))
        .route("/nodes/register", post(handlers::register_node))
        .route("/nodes/{id}", get(handlers::get_node))
        .route("/nodes/{id}/unregister", post(handlers::unregister_node))
        .route("/nodes/{id}/ping", post(handlers::ping_node))
        .route(
            "/nodes/{id}/configuration",
            get(handlers::get_node_configuration).post(handlers::set_node_configuration),
        )
        .route("/nodes/{id}/apps", get(handlers::node_apps))
        .route("/nodes/{id}/apps/deploy", post(handlers::node_deploy))
        .route(
            "/nodes/{id}/apps/{app}",
            get(handlers::node_app)
                .post(handlers::node_update_info)
                .delete(handlers::node_delete_app),
        )
        .route("/nodes/{id}/apps/{app}/{action}", post(handlers::node_app_action))
        .route("/groups", get(handlers::list_groups))
        .route("/groups/create", post(handlers::create_group))
        .route(
            "/groups/{id}",
            get(handlers::get_group).delete(handlers::delete_group),
        )
        .route("/groups/{id}/join", post(handlers::join_group))
        .route("/groups/{id}/leave", post(handlers::leave_group))
        .route("/groups/{id}/apps", get(handlers::group_apps))
        .route("/groups/{id}/apps/deploy", post(handlers::group_deploy))
        .route(
            "/groups/{id}/apps/{app}",
            get(handlers::group_app)
                .post(handlers::group_update_info)
                .delete(handlers::group_delete_app),
        )
        .route("/groups/{id}/apps/{app}/{action}", post(handlers::group_app_action))
        .route("/apps", get(handlers::list_apps))
        .route("/apps/{id}", get(handlers::get_app));

    let search = Router::new()
        .route("/nodes", get(handlers::search_nodes))
        .route("/apps", get(handlers::search_apps));

    let notification = Router::new()
        .route("/", get(notification_handlers::list_subscribers))
        .route("/register", post(notification_handlers::register))
        .route(
            "/{id}",
            post(notification_handlers::inbound_event).delete(notification_handlers::unregister),
        );

    let api = Router::new()
        .nest("/management", management)
        .nest("/search", search)
        .nest("/notification", notification)
        .with_state(state);

    Router::new().nest("/api/v1", api)
}
