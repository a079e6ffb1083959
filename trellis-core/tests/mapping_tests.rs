use indexmap::IndexMap;
use parking_lot::Mutex;
use std::cmp::Ordering as RankOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use trellis_core::*;

struct UserController;
struct ItemController;

fn user_type() -> BeanType {
    BeanType::new("UserController")
        .with_method("me")
        .with_method_params("show", ["u64"])
        .with_method("create")
        .with_method("helper")
}

fn user_routes() -> RouteTable {
    RouteTable::new()
        .route(RouteEntry::get("UserController", "show", "/users/{id}"))
        .route(RouteEntry::get("UserController", "me", "/users/me"))
        .route(RouteEntry::post("UserController", "create", "/users"))
}

fn user_mapping() -> HandlerMethodMapping<RouteMapping, RouteTable> {
    let container = Container::new();
    container.register_instance("userController", user_type(), UserController);
    let mapping = HandlerMethodMapping::new(user_routes(), Arc::new(container))
        .with_naming_strategy(Arc::new(InitialsNamingStrategy));
    mapping.initialize().unwrap();
    mapping
}

fn resolve(
    mapping: &HandlerMethodMapping<RouteMapping, RouteTable>,
    method: &str,
    path: &str,
) -> Result<Option<String>> {
    let mut request = HttpRequest::new(method, path);
    Ok(mapping
        .get_handler(&mut request)?
        .map(|chain| chain.handler().method().name.clone()))
}

#[test]
fn test_literal_path_wins_over_pattern() {
    let mapping = user_mapping();

    assert_eq!(resolve(&mapping, "GET", "/users/me").unwrap().as_deref(), Some("me"));
    assert_eq!(resolve(&mapping, "GET", "/users/42").unwrap().as_deref(), Some("show"));
    assert_eq!(resolve(&mapping, "POST", "/users").unwrap().as_deref(), Some("create"));
}

#[test]
fn test_lookup_records_request_attributes() {
    let mapping = user_mapping();
    let mut request = HttpRequest::new("GET", "/users//42?expand=true");

    let chain = mapping.get_handler(&mut request).unwrap().unwrap();

    assert_eq!(
        request.attributes.get::<LookupPath>(),
        Some(&LookupPath("/users/42".to_string()))
    );
    assert_eq!(
        request.attributes.get::<PathWithinHandlerMapping>(),
        Some(&PathWithinHandlerMapping("/users/42".to_string()))
    );
    let best = request
        .attributes
        .get::<BestMatchingMapping<RouteMapping>>()
        .unwrap();
    assert_eq!(best.0.patterns(), ["/users/{id}".to_string()]);
    assert_eq!(best.0.methods(), [HttpMethod::GET]);

    let handler = &request.attributes.get::<BestMatchingHandler>().unwrap().0;
    assert!(handler.is_deferred());
    assert_eq!(chain.handler().resolved_from(), Some(handler));
}

#[test]
fn test_resolved_handler_carries_bean_instance() {
    let mapping = user_mapping();
    let mut request = HttpRequest::new("GET", "/users/me");

    let chain = mapping.get_handler(&mut request).unwrap().unwrap();

    assert!(!chain.handler().is_deferred());
    assert!(chain.handler().downcast_bean::<UserController>().is_some());
}

#[test]
fn test_no_match_without_default_handler() {
    let mapping = user_mapping();

    assert_eq!(resolve(&mapping, "GET", "/orders").unwrap(), None);
    assert_eq!(resolve(&mapping, "DELETE", "/users/me").unwrap(), None);
}

#[test]
fn test_default_handler_used_when_nothing_matches() {
    let container = Container::new();
    container.register_instance("userController", user_type(), UserController);
    let fallback = HandlerMethod::from_instance(
        Arc::new(UserController),
        MethodSignature::new("UserController", "not_found"),
    );
    let mapping = HandlerMethodMapping::new(user_routes(), Arc::new(container))
        .with_default_handler(fallback);
    mapping.initialize().unwrap();

    assert_eq!(resolve(&mapping, "GET", "/missing").unwrap().as_deref(), Some("not_found"));
    assert_eq!(resolve(&mapping, "GET", "/users/me").unwrap().as_deref(), Some("me"));
}

#[test]
fn test_head_request_served_by_get_mapping() {
    let mapping = user_mapping();
    assert_eq!(resolve(&mapping, "HEAD", "/users/7").unwrap().as_deref(), Some("show"));
}

#[test]
fn test_url_decoding_of_lookup_path() {
    let container = Container::new();
    container.register_instance(
        "files",
        BeanType::new("FileController").with_method("report"),
        (),
    );
    let routes = RouteTable::new().route(RouteEntry::get("FileController", "report", "/files/annual report"));

    let decoding = HandlerMethodMapping::new(routes, Arc::new(container.clone()));
    decoding.initialize().unwrap();
    assert_eq!(
        resolve(&decoding, "GET", "/files/annual%20report").unwrap().as_deref(),
        Some("report")
    );

    let routes = RouteTable::new().route(RouteEntry::get("FileController", "report", "/files/annual report"));
    let raw = HandlerMethodMapping::new(routes, Arc::new(container)).url_decode(false);
    raw.initialize().unwrap();
    assert_eq!(resolve(&raw, "GET", "/files/annual%20report").unwrap(), None);
}

#[test]
fn test_repeated_lookups_are_deterministic() {
    let mapping = user_mapping();
    let first = resolve(&mapping, "GET", "/users/abc").unwrap();
    for _ in 0..50 {
        assert_eq!(resolve(&mapping, "GET", "/users/abc").unwrap(), first);
    }
}

fn ambiguous_mapping(cors_on_second: bool) -> HandlerMethodMapping<RouteMapping, RouteTable> {
    let container = Container::new();
    container.register_instance(
        "itemController",
        BeanType::new("ItemController")
            .with_method("by_id")
            .with_method("by_name"),
        ItemController,
    );
    let mut by_name = RouteEntry::get("ItemController", "by_name", "/items/{name}");
    if cors_on_second {
        by_name = by_name.with_cors(CorsConfig::new().allow_origin("https://shop.test"));
    }
    let routes = RouteTable::new()
        .route(RouteEntry::get("ItemController", "by_id", "/items/{id}"))
        .route(by_name);
    let mapping = HandlerMethodMapping::new(routes, Arc::new(container));
    mapping.initialize().unwrap();
    mapping
}

fn preflight(path: &str) -> HttpRequest {
    HttpRequest::new("OPTIONS", path)
        .with_header("Origin", "https://shop.test")
        .with_header("Access-Control-Request-Method", "GET")
}

#[test]
fn test_equal_ranking_is_ambiguous() {
    let mapping = ambiguous_mapping(false);
    let mut request = HttpRequest::new("GET", "/items/42?x=1");

    let err = mapping.get_handler(&mut request).unwrap_err();

    match &err {
        Error::AmbiguousHandlerMethods { uri, first, second } => {
            assert_eq!(uri, "/items/42");
            let mut names = vec![first.as_str(), second.as_str()];
            names.sort();
            assert_eq!(names, vec!["ItemController::by_id()", "ItemController::by_name()"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.status_code(), 500);
}

#[test]
fn test_preflight_tie_without_cors_returns_first_ranked() {
    let mapping = ambiguous_mapping(false);
    let mut request = preflight("/items/42");

    let chain = mapping.get_handler(&mut request).unwrap().unwrap();

    assert!(!chain.handler().is_preflight_ambiguous_match());
    assert_eq!(chain.handler().method().name, "by_id");
    assert_eq!(
        request
            .attributes
            .get::<BestMatchingHandler>()
            .map(|h| h.0.method().name.clone())
            .as_deref(),
        Some("by_id")
    );
}

#[test]
fn test_preflight_ambiguity_with_cors_returns_sentinel() {
    let mapping = ambiguous_mapping(true);
    let mut request = preflight("/items/42");

    let mut chain = mapping.get_handler(&mut request).unwrap().unwrap();
    assert!(chain.handler().is_preflight_ambiguous_match());
    assert_eq!(chain.interceptors()[0].name(), "CorsInterceptor");

    let mut response = HttpResponse::ok();
    let invoked = AtomicUsize::new(0);
    let outcome = chain
        .execute(&mut request, &mut response, |_, _, _| {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .unwrap();

    assert_eq!(outcome, ChainOutcome::ShortCircuited);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(response.status, 200);
    assert_eq!(
        response.headers.get("Access-Control-Allow-Origin").map(String::as_str),
        Some("https://shop.test")
    );
    assert_eq!(
        response.headers.get("Access-Control-Allow-Credentials").map(String::as_str),
        Some("true")
    );
}

#[test]
fn test_handler_cors_config_rejects_foreign_origin() {
    let container = Container::new();
    container.register_instance("api", BeanType::new("Api").with_method("status"), ());
    let routes = RouteTable::new().route(
        RouteEntry::get("Api", "status", "/status")
            .with_cors(CorsConfig::new().allow_origin("https://app.test")),
    );
    let mapping = HandlerMethodMapping::new(routes, Arc::new(container));
    mapping.initialize().unwrap();

    let handler = mapping.handler_methods().values().next().cloned().unwrap();
    assert!(mapping.has_cors_configuration_source(&handler));

    let mut allowed = HttpRequest::new("GET", "/status").with_header("Origin", "https://app.test");
    let mut response = HttpResponse::ok();
    let mut chain = mapping.get_handler(&mut allowed).unwrap().unwrap();
    let outcome = chain
        .execute(&mut allowed, &mut response, |_, _, _| Ok(None))
        .unwrap();
    assert_eq!(outcome, ChainOutcome::Completed(None));
    assert_eq!(
        response.headers.get("Access-Control-Allow-Origin").map(String::as_str),
        Some("https://app.test")
    );

    let mut foreign = HttpRequest::new("GET", "/status").with_header("Origin", "https://evil.test");
    let mut response = HttpResponse::ok();
    let mut chain = mapping.get_handler(&mut foreign).unwrap().unwrap();
    let outcome = chain
        .execute(&mut foreign, &mut response, |_, _, _| Ok(None))
        .unwrap();
    assert_eq!(outcome, ChainOutcome::ShortCircuited);
    assert_eq!(response.status, 403);
}

#[test]
fn test_global_cors_combined_with_handler_config() {
    let container = Container::new();
    container.register_instance("api", BeanType::new("Api").with_method("status"), ());
    let routes = RouteTable::new().route(
        RouteEntry::get("Api", "status", "/api/status")
            .with_cors(CorsConfig::new().allow_origin("https://b.test").max_age(60)),
    );
    let mapping = HandlerMethodMapping::new(routes, Arc::new(container))
        .with_cors_mapping("/api/**", CorsConfig::new().allow_origin("https://a.test"))
        .with_cors_mapping("/**", CorsConfig::permissive());
    mapping.initialize().unwrap();

    let mut request = HttpRequest::new("GET", "/api/status");
    let chain = mapping.get_handler(&mut request).unwrap().unwrap();
    let config = mapping.cors_configuration(chain.handler(), &request).unwrap();

    assert!(config.is_origin_allowed("https://a.test"));
    assert!(config.is_origin_allowed("https://b.test"));
    assert!(!config.is_origin_allowed("https://c.test"));
    assert_eq!(config.max_age_secs(), Some(60));
}

#[test]
fn test_invalid_credentials_config_fails_lookup() {
    let container = Container::new();
    container.register_instance("api", BeanType::new("Api").with_method("status"), ());
    let routes = RouteTable::new().route(RouteEntry::get("Api", "status", "/status"));
    let mapping = HandlerMethodMapping::new(routes, Arc::new(container)).with_cors_mapping(
        "/**",
        CorsConfig::new().allow_any_origin().allow_credentials(true),
    );
    mapping.initialize().unwrap();

    let mut request = HttpRequest::new("GET", "/status");
    assert!(matches!(
        mapping.get_handler(&mut request),
        Err(Error::InvalidCorsConfig(_))
    ));
}

#[test]
fn test_interceptors_selected_by_lookup_path() {
    struct Tag(&'static str);
    impl HandlerInterceptor for Tag {
        fn name(&self) -> &str {
            self.0
        }
    }

    let container = Container::new();
    container.register_instance("userController", user_type(), UserController);
    let mapping = HandlerMethodMapping::new(user_routes(), Arc::new(container))
        .with_interceptor(Arc::new(Tag("global")))
        .with_mapped_interceptor(
            MappedInterceptor::new(Arc::new(Tag("users")))
                .include("/users/**")
                .exclude("/users/me"),
        );
    mapping.initialize().unwrap();

    let names = |path: &str| -> Vec<String> {
        let mut request = HttpRequest::new("GET", path);
        let chain = mapping.get_handler(&mut request).unwrap().unwrap();
        chain.interceptors().iter().map(|i| i.name().to_string()).collect()
    };

    assert_eq!(names("/users/1"), vec!["global", "users"]);
    assert_eq!(names("/users/me"), vec!["global"]);
}

#[test]
fn test_mapping_names_from_naming_strategy() {
    let mapping = user_mapping();

    let show = mapping.handler_methods_for_mapping_name("UC#show").unwrap();
    assert_eq!(show.len(), 1);
    assert_eq!(show[0].method().name, "show");
    assert!(mapping.handler_methods_for_mapping_name("UC#helper").is_none());
}

#[test]
fn test_runtime_register_requires_ready_state() {
    let container = Container::new();
    let mapping = HandlerMethodMapping::new(RouteTable::new(), Arc::new(container));

    let err = mapping
        .register_mapping(
            RouteMapping::get("/late"),
            "lateController",
            MethodSignature::new("LateController", "handle"),
        )
        .unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));
    assert_eq!(mapping.state(), MappingState::Uninitialized);

    mapping.initialize().unwrap();
    assert_eq!(mapping.state(), MappingState::Ready);
    assert!(matches!(mapping.initialize(), Err(Error::IllegalState(_))));
}

#[test]
fn test_runtime_register_and_unregister_round_trip() {
    let mapping = user_mapping();
    let before = mapping.handler_methods();
    let names_before = mapping.registry().name_count();
    let cors_before = mapping.registry().cors_count();

    let late = RouteMapping::get("/reports/daily").named("reports.daily");
    mapping
        .register_mapping(
            late.clone(),
            HandlerSource::instance(ItemController),
            MethodSignature::new("ReportController", "daily"),
        )
        .unwrap();
    assert_eq!(resolve(&mapping, "GET", "/reports/daily").unwrap().as_deref(), Some("daily"));
    assert!(mapping.handler_methods_for_mapping_name("reports.daily").is_some());

    mapping.unregister_mapping(&late).unwrap();

    assert_eq!(mapping.handler_methods(), before);
    assert_eq!(mapping.registry().name_count(), names_before);
    assert_eq!(mapping.registry().cors_count(), cors_before);
    assert!(mapping.handler_methods_for_mapping_name("reports.daily").is_none());
    assert!(mapping.registry().read().mappings_by_direct_path("/reports/daily").is_empty());
    assert_eq!(resolve(&mapping, "GET", "/reports/daily").unwrap(), None);
}

#[test]
fn test_duplicate_mapping_keeps_first_binding() {
    let mapping = user_mapping();

    let err = mapping
        .register_mapping(
            RouteMapping::get("/users/me"),
            "otherController",
            MethodSignature::new("OtherController", "me"),
        )
        .unwrap_err();

    assert!(matches!(err, Error::AmbiguousMapping { .. }));
    assert_eq!(mapping.handler_methods().len(), 3);
    assert_eq!(resolve(&mapping, "GET", "/users/me").unwrap().as_deref(), Some("me"));
}

#[test]
fn test_descriptor_build_failure_aborts_initialization() {
    let container = Container::new();
    container.register_instance("userController", user_type(), UserController);
    let routes = user_routes().route(RouteEntry::get("UserController", "helper", "relative/path"));
    let mapping = HandlerMethodMapping::new(routes, Arc::new(container));

    let err = mapping.initialize().unwrap_err();

    assert!(matches!(err, Error::InvalidMapping { .. }));
    assert_eq!(mapping.state(), MappingState::Uninitialized);
    assert!(mapping.handler_methods().is_empty());
}

#[test]
fn test_discovery_skips_unresolvable_and_scoped_targets() {
    let container = Container::new();
    container.register_lazy::<UserController, _>("untyped", None, || Ok(UserController));
    container.register_instance("scopedTarget.userController", user_type(), UserController);
    container.register_instance("userController", user_type(), UserController);

    let mapping = HandlerMethodMapping::new(user_routes(), Arc::new(container));
    mapping.initialize().unwrap();

    let beans: Vec<String> = mapping
        .handler_methods()
        .values()
        .map(|h| h.bean_description().to_string())
        .collect();
    assert_eq!(beans.len(), 3);
    assert!(beans.iter().all(|b| b == "userController"));
}

#[test]
fn test_ancestor_container_beans_detected_when_enabled() {
    let parent = Container::new();
    parent.register_instance("userController", user_type(), UserController);
    let parent: Arc<dyn BeanContainer> = Arc::new(parent);

    let local_only = HandlerMethodMapping::new(user_routes(), Arc::new(Container::with_parent(parent.clone())));
    local_only.initialize().unwrap();
    assert!(local_only.handler_methods().is_empty());

    let with_ancestors = HandlerMethodMapping::new(user_routes(), Arc::new(Container::with_parent(parent)))
        .detect_in_ancestor_contexts(true);
    with_ancestors.initialize().unwrap();
    assert_eq!(with_ancestors.handler_methods().len(), 3);
    assert_eq!(
        resolve(&with_ancestors, "GET", "/users/me").unwrap().as_deref(),
        Some("me")
    );
}

#[test]
fn test_lazy_bean_created_once_on_first_lookup() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);
    let container = Container::new();
    container.register_lazy("userController", Some(user_type()), move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(UserController)
    });

    let mapping = HandlerMethodMapping::new(user_routes(), Arc::new(container));
    mapping.initialize().unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 0);

    for _ in 0..3 {
        assert_eq!(resolve(&mapping, "GET", "/users/me").unwrap().as_deref(), Some("me"));
    }
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_lookups_during_registration() {
    let mapping = Arc::new(user_mapping());
    let barrier = Arc::new(Barrier::new(5));
    let mut handles = Vec::new();

    for _ in 0..4 {
        let mapping = Arc::clone(&mapping);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for _ in 0..200 {
                assert_eq!(resolve(&mapping, "GET", "/users/me").unwrap().as_deref(), Some("me"));
                assert_eq!(resolve(&mapping, "GET", "/users/9").unwrap().as_deref(), Some("show"));
            }
        }));
    }

    {
        let mapping = Arc::clone(&mapping);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..100 {
                let route = RouteMapping::get(format!("/dynamic/{}", i));
                mapping
                    .register_mapping(
                        route.clone(),
                        "dynamicController",
                        MethodSignature::new("DynamicController", format!("route_{}", i)),
                    )
                    .unwrap();
                if i % 2 == 0 {
                    mapping.unregister_mapping(&route).unwrap();
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(mapping.handler_methods().len(), 3 + 50);
}

/// Route table that records the bindings seen at initialization and falls
/// back to `UserController::helper` when nothing matches.
struct HookedRoutes {
    routes: RouteTable,
    initialized: Mutex<Vec<(RouteMapping, String)>>,
}

impl MappingStrategy<RouteMapping> for HookedRoutes {
    fn is_handler(&self, bean_type: &BeanType) -> bool {
        self.routes.is_handler(bean_type)
    }

    fn mapping_for_method(&self, method: &MethodSignature, handler_type: &BeanType) -> Result<Option<RouteMapping>> {
        self.routes.mapping_for_method(method, handler_type)
    }

    fn direct_paths(&self, mapping: &RouteMapping) -> Vec<String> {
        self.routes.direct_paths(mapping)
    }

    fn matching_mapping(&self, mapping: &RouteMapping, request: &HttpRequest) -> Option<RouteMapping> {
        self.routes.matching_mapping(mapping, request)
    }

    fn compare(&self, a: &RouteMapping, b: &RouteMapping, request: &HttpRequest) -> RankOrdering {
        self.routes.compare(a, b, request)
    }

    fn handle_no_match(
        &self,
        registry: &RegistryReadGuard<'_, RouteMapping>,
        lookup_path: &str,
        _request: &HttpRequest,
    ) -> Result<Option<HandlerMethod>> {
        if !lookup_path.starts_with("/users/") || registry.is_empty() {
            return Ok(None);
        }
        Ok(Some(HandlerMethod::from_bean_name(
            "userController",
            MethodSignature::new("UserController", "helper"),
        )))
    }

    fn handler_methods_initialized(&self, handler_methods: &IndexMap<RouteMapping, HandlerMethod>) {
        self.initialized.lock().extend(
            handler_methods
                .iter()
                .map(|(mapping, handler)| (mapping.clone(), handler.method().name.clone())),
        );
    }
}

fn hooked_mapping() -> HandlerMethodMapping<RouteMapping, HookedRoutes> {
    let container = Container::new();
    container.register_instance("userController", user_type(), UserController);
    let strategy = HookedRoutes {
        routes: user_routes(),
        initialized: Mutex::new(Vec::new()),
    };
    let mapping = HandlerMethodMapping::new(strategy, Arc::new(container));
    mapping.initialize().unwrap();
    mapping
}

#[test]
fn test_initialized_hook_sees_every_binding() {
    let mapping = hooked_mapping();

    let seen = mapping.strategy().initialized.lock().clone();
    let names: Vec<&str> = seen.iter().map(|(_, name)| name.as_str()).collect();
    assert_eq!(names, vec!["me", "show", "create"]);
    assert_eq!(seen[1].0, RouteMapping::get("/users/{id}"));
    assert_eq!(
        seen.into_iter().map(|(m, _)| m).collect::<Vec<_>>(),
        mapping.handler_methods().keys().cloned().collect::<Vec<_>>()
    );
}

#[test]
fn test_no_match_fallback_handler_is_resolved_and_wrapped() {
    let mapping = hooked_mapping();
    let mut request = HttpRequest::new("DELETE", "/users/42");

    let chain = mapping.get_handler(&mut request).unwrap().unwrap();

    assert_eq!(chain.handler().method().name, "helper");
    assert!(chain.handler().downcast_bean::<UserController>().is_some());
    assert!(chain.handler().resolved_from().unwrap().is_deferred());
    assert!(request.attributes.get::<BestMatchingHandler>().is_none());
    assert_eq!(
        request.attributes.get::<LookupPath>().map(|p| p.0.as_str()),
        Some("/users/42")
    );

    let mut elsewhere = HttpRequest::new("GET", "/orders");
    assert!(mapping.get_handler(&mut elsewhere).unwrap().is_none());
}
