//! Redirect loader behavior: hop recording, pinning enforcement, loop
//! termination and the error taxonomy of the chain.

mod utils;

use url::Url;

use eid_activation::activation::ActivationContext;
use eid_activation::resource::{
    CertificateDescription, LoadError, RedirectCertificateValidator, ResourceLoader,
};

use utils::{MockProvider, MockResponse, cert, pin};

fn url(s: &str) -> Url {
    Url::parse(s).expect("static test URL")
}

#[tokio::test]
async fn follows_a_pinned_chain_to_the_sop_matching_hop() {
    utils::init_tracing();
    let provider = MockProvider::new();
    let (cert_a, cert_b, cert_c) = (cert("a"), cert("b"), cert("c"));
    provider.route("https://a.example/start", MockResponse::redirect("https://b.example/next", cert_a.clone()));
    provider.route("https://b.example/next", MockResponse::redirect("https://sp.example/done", cert_b.clone()));
    provider.route("https://sp.example/done", MockResponse::ok_body("", cert_c.clone()));

    let ctx = ActivationContext::new();
    ctx.provide_eservice_description(CertificateDescription {
        subject_url: Some("https://sp.example".to_string()),
        comm_certificates: vec![pin(&cert_a), pin(&cert_b), pin(&cert_c)],
    });

    let mut validator = RedirectCertificateValidator::new(&ctx, true);
    let loader = ResourceLoader::new(&provider, &ctx);
    let resource = loader
        .load_with_validator(&url("https://a.example/start"), &mut validator)
        .await
        .expect("chain resolves");

    assert_eq!(resource.hops().len(), 3);
    assert_eq!(resource.final_url().map(Url::as_str), Some("https://sp.example/done"));
    // the destination hop is never fetched, only validated
    assert!(resource.body().is_none());
}

#[tokio::test]
async fn unpinned_middle_hop_stops_the_chain_immediately() {
    utils::init_tracing();
    let provider = MockProvider::new();
    let (cert_a, cert_b, cert_c) = (cert("a"), cert("b"), cert("c"));
    provider.route("https://a.example/start", MockResponse::redirect("https://b.example/next", cert_a.clone()));
    provider.route("https://b.example/next", MockResponse::redirect("https://sp.example/done", cert_b.clone()));
    provider.route("https://sp.example/done", MockResponse::ok_body("", cert_c.clone()));

    let ctx = ActivationContext::new();
    // the middle hop's certificate is not in the pinned set
    ctx.provide_eservice_description(CertificateDescription {
        subject_url: Some("https://sp.example".to_string()),
        comm_certificates: vec![pin(&cert_a), pin(&cert_c)],
    });

    let mut validator = RedirectCertificateValidator::new(&ctx, true);
    let loader = ResourceLoader::new(&provider, &ctx);
    let error = loader
        .load_with_validator(&url("https://a.example/start"), &mut validator)
        .await
        .expect_err("pin mismatch stops the chain");

    let LoadError::Validation(validation) = error else {
        panic!("wrong error kind: {error}");
    };
    assert_eq!(validation.origin, "https://b.example:443");
}

#[tokio::test]
async fn disabled_checks_accept_the_first_hop() {
    utils::init_tracing();
    let provider = MockProvider::new();
    provider.route("https://a.example/start", MockResponse::redirect("https://b.example/next", cert("a")));

    let ctx = ActivationContext::new();
    let mut validator = RedirectCertificateValidator::new(&ctx, false);
    let loader = ResourceLoader::new(&provider, &ctx);
    let resource = loader
        .load_with_validator(&url("https://a.example/start"), &mut validator)
        .await
        .expect("first hop accepted");

    // the browser performs any further redirects itself
    assert_eq!(resource.hops().len(), 1);
    assert_eq!(resource.final_url().map(Url::as_str), Some("https://a.example/start"));
}

#[tokio::test]
async fn chain_ending_before_a_valid_destination_is_an_error() {
    utils::init_tracing();
    let provider = MockProvider::new();
    let cert_a = cert("a");
    provider.route("https://a.example/start", MockResponse::ok_body("", cert_a.clone()));

    let ctx = ActivationContext::new();
    ctx.set_token_url(url("https://sp.example/token"));
    ctx.provide_eservice_description(CertificateDescription {
        subject_url: None,
        comm_certificates: vec![pin(&cert_a)],
    });

    let mut validator = RedirectCertificateValidator::new(&ctx, true);
    let loader = ResourceLoader::new(&provider, &ctx);
    let error = loader
        .load_with_validator(&url("https://a.example/start"), &mut validator)
        .await
        .expect_err("non-redirect on a continue hop");
    assert!(matches!(error, LoadError::InvalidRedirectChain));
}

#[tokio::test]
async fn insecure_urls_are_rejected() {
    utils::init_tracing();
    let provider = MockProvider::new();
    let ctx = ActivationContext::new();
    let loader = ResourceLoader::new(&provider, &ctx);
    let error = loader.load(&url("http://a.example/start")).await.expect_err("http is refused");
    assert!(matches!(error, LoadError::InsecureUrl));
}

#[tokio::test]
async fn error_status_stops_the_chain() {
    utils::init_tracing();
    let provider = MockProvider::new();
    provider.route("https://a.example/start", MockResponse::status(404, cert("a")));

    let ctx = ActivationContext::new();
    let loader = ResourceLoader::new(&provider, &ctx);
    let error = loader.load(&url("https://a.example/start")).await.expect_err("404 is an error");
    assert!(matches!(error, LoadError::Status { status: 404 }));
}

#[tokio::test]
async fn missing_location_header_is_an_error() {
    utils::init_tracing();
    let provider = MockProvider::new();
    provider.route(
        "https://a.example/start",
        MockResponse { status: 302, location: None, body: None, set_cookies: Vec::new(), cert: cert("a") },
    );

    let ctx = ActivationContext::new();
    let loader = ResourceLoader::new(&provider, &ctx);
    let error = loader.load(&url("https://a.example/start")).await.expect_err("redirect without target");
    assert!(matches!(error, LoadError::MissingLocation));
}

#[tokio::test]
async fn redirect_depth_is_limited() {
    utils::init_tracing();
    let provider = MockProvider::new();
    // two routes redirecting at each other never terminate
    provider.route("https://a.example/x", MockResponse::redirect("https://a.example/y", cert("a")));
    provider.route("https://a.example/y", MockResponse::redirect("https://a.example/x", cert("a")));

    let ctx = ActivationContext::new();
    let loader = ResourceLoader::new(&provider, &ctx);
    let error = loader.load(&url("https://a.example/x")).await.expect_err("loop must be cut");
    assert!(matches!(error, LoadError::RedirectDepth));
}

#[tokio::test]
async fn relative_location_headers_are_resolved() {
    utils::init_tracing();
    let provider = MockProvider::new();
    provider.route("https://a.example/x", MockResponse::redirect("/y", cert("a")));
    provider.route("https://a.example/y", MockResponse::ok_body("payload", cert("a")));

    let ctx = ActivationContext::new();
    let loader = ResourceLoader::new(&provider, &ctx);
    let resource = loader.load(&url("https://a.example/x")).await.expect("chain resolves");
    assert_eq!(resource.final_url().map(Url::as_str), Some("https://a.example/y"));
    assert_eq!(resource.body(), Some("payload"));
}

#[tokio::test]
async fn cookies_are_carried_across_hops() {
    utils::init_tracing();
    let provider = MockProvider::new();
    provider.route(
        "https://a.example/x",
        MockResponse {
            status: 302,
            location: Some("/y".to_string()),
            body: None,
            set_cookies: vec!["session=xyz; Path=/".to_string()],
            cert: cert("a"),
        },
    );
    provider.route("https://a.example/y", MockResponse::ok_body("", cert("a")));

    let ctx = ActivationContext::new();
    let loader = ResourceLoader::new(&provider, &ctx);
    loader.load(&url("https://a.example/x")).await.expect("chain resolves");

    // the jar now answers for the origin the cookie was set on
    assert_eq!(ctx.cookie_header_for(&url("https://a.example/y")).as_deref(), Some("session=xyz"));
}
