use std::path::PathBuf;
use std::sync::Arc;

use ulid::Ulid;

use spotres::clock::ManualClock;
use spotres::config::EngineConfig;
use spotres::directory::{InMemoryDirectory, ResourceDirectory};
use spotres::engine::{Engine, EngineDeps};
use spotres::model::*;
use spotres::notify::{LifecycleKind, NotifyHub};
use spotres::pricing::{
    DiscountCode, DiscountKind, InMemoryDiscountRegistry, PricingContext, PricingEngine,
    StaticRateTable,
};
use spotres::sweeper::Sweeper;

// ── Test infrastructure ──────────────────────────────────────

/// Wednesday 2027-01-13 00:00 UTC.
const WEDNESDAY: Ms = 1_799_798_400_000;
/// Friday 2027-01-15 00:00 UTC.
const FRIDAY: Ms = 1_799_971_200_000;

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("spotres_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

struct Facility {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
}

fn facility(directory: InMemoryDirectory, codes: Vec<DiscountCode>) -> Facility {
    let clock = Arc::new(ManualClock::new(WEDNESDAY));
    let directory: Arc<dyn ResourceDirectory> = Arc::new(directory);
    let config = EngineConfig::default();
    let pricing = Arc::new(PricingEngine::new(
        Arc::new(StaticRateTable::default()),
        Arc::new(InMemoryDiscountRegistry::with_codes(codes)),
        directory.clone(),
        clock.clone(),
        config.pricing.clone(),
    ));
    let deps = EngineDeps {
        directory,
        pricing,
        clock: clock.clone(),
        notify: Arc::new(NotifyHub::new()),
    };
    let engine = Engine::new(temp_dir().join("reservations.wal"), deps, config).unwrap();
    Facility {
        engine: Arc::new(engine),
        clock,
    }
}

fn regular(id: &str, zone: &str, occupied: bool) -> Spot {
    Spot {
        id: id.into(),
        spot_type: SpotType::Regular,
        features: FeatureSet::new(),
        zone: zone.into(),
        occupied,
    }
}

fn request(requester: &str, start: Ms, end: Ms) -> ReservationRequest {
    ReservationRequest {
        requester_id: requester.into(),
        spot_id: None,
        spot_type: SpotType::Regular,
        features: FeatureSet::new(),
        start,
        end,
        vehicle: VehicleInfo {
            license_plate: " KX-4410 ".into(),
            make: Some("Volvo".into()),
            model: Some("V60".into()),
            color: None,
        },
        notes: Some("arriving from the north gate".into()),
        allow_waitlist: false,
        membership: None,
        discount_code: None,
    }
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn premium_member_in_morning_peak() {
    let f = facility(InMemoryDirectory::with_spots([regular("A-1", "main", false)]), vec![]);

    let mut req = request("u1", FRIDAY + 8 * HOUR_MS, FRIDAY + 10 * HOUR_MS);
    req.membership = Some(MembershipTier::Premium);
    let result = f.engine.allocate(req).await.unwrap();

    let quote = result.quote.unwrap();
    assert_eq!(quote.surge_multiplier, 1.5);
    assert_eq!(quote.surge_rate, 7.5);
    assert_eq!(quote.membership_discount, 0.75);
    assert_eq!(quote.final_rate, 6.75);
    assert_eq!(quote.total_estimate, 13.5);

    let stored = f.engine.get_reservation(result.reservation_id).unwrap();
    assert_eq!(stored.vehicle.license_plate, "KX-4410");
    assert_eq!(stored.quote.unwrap().total_estimate, 13.5);
}

#[tokio::test]
async fn discount_codes_and_duration_ladder() {
    let save = DiscountCode {
        code: "SAVE20".into(),
        kind: DiscountKind::Percent(20.0),
        max_discount: Some(2.0),
        valid_from: None,
        valid_until: None,
        active: true,
    };
    let f = facility(InMemoryDirectory::with_spots([regular("A-1", "main", false)]), vec![save]);
    let pricing = f.engine.pricing();

    let mut ctx = PricingContext::hourly(SpotType::Regular, WEDNESDAY + 12 * HOUR_MS, 60);
    ctx.discount_code = Some("save20".into());
    let options = pricing.pricing_options(&ctx).await.unwrap();

    assert_eq!(options.len(), 5);
    assert!(options.iter().all(|o| o.quote.final_rate == 4.0));
    let totals: Vec<f64> = options.iter().map(|o| o.quote.total_estimate).collect();
    assert!(totals.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(totals[0], 4.0);

    assert!(pricing.validate_discount_code("SAVE20").await.unwrap().valid);
    let unknown = pricing.validate_discount_code("NOPE").await.unwrap();
    assert!(!unknown.valid);
    assert_eq!(unknown.reason.as_deref(), Some("discount code not found"));

    // An unknown code on a booking is ignored rather than rejected.
    let mut req = request("u1", WEDNESDAY + 12 * HOUR_MS, WEDNESDAY + 13 * HOUR_MS);
    req.discount_code = Some("NOPE".into());
    let result = f.engine.allocate(req).await.unwrap();
    assert_eq!(result.quote.unwrap().final_rate, 5.0);
}

#[tokio::test]
async fn surge_info_per_zone() {
    let f = facility(
        InMemoryDirectory::with_spots([
            regular("A-1", "main", false),
            regular("N-1", "north", true),
            regular("N-2", "north", true),
        ]),
        vec![],
    );
    let info = f.engine.pricing().current_surge_info().await.unwrap();

    assert_eq!(info.len(), 2);
    assert_eq!(info[0].zone, "main");
    assert_eq!(info[0].multiplier, 1.0);
    assert_eq!(info[0].reason, "normal demand");
    assert_eq!(info[1].zone, "north");
    assert_eq!(info[1].occupancy, 1.0);
    assert_eq!(info[1].multiplier, 3.0);
}

#[tokio::test]
async fn full_visit_from_fixture_file() {
    let dir = temp_dir();
    let spots = dir.join("spots.json");
    std::fs::write(
        &spots,
        r#"[
            {"id": "B-2", "spot_type": "REGULAR", "zone": "east"},
            {"id": "B-1", "spot_type": "STANDARD", "zone": "east"}
        ]"#,
    )
    .unwrap();
    let f = facility(InMemoryDirectory::load_json(&spots).unwrap(), vec![]);
    let sweeper = Sweeper::new(f.engine.clone());
    let mut events = f.engine.notify.subscribe("u1");

    let start = WEDNESDAY + 10 * HOUR_MS;
    let result = f.engine.allocate(request("u1", start, start + 2 * HOUR_MS)).await.unwrap();
    // Lowest id wins the tie.
    assert_eq!(result.spot_id.as_deref(), Some("B-1"));

    f.clock.set(start + 5 * 60_000);
    f.engine
        .check_in(result.reservation_id, &Actor::Requester("u1".into()))
        .await
        .unwrap();

    // Checked-in visitors are not no-shows.
    f.clock.set(start + HOUR_MS);
    assert_eq!(sweeper.run_no_show().await.unwrap().unwrap().no_shows, 0);

    f.clock.set(start + 2 * HOUR_MS);
    let report = sweeper.run_expiry().await.unwrap().unwrap();
    assert_eq!(report.completed, 1);

    let kinds: Vec<LifecycleKind> = (0..3).map(|_| events.try_recv().unwrap().kind).collect();
    assert_eq!(
        kinds,
        vec![LifecycleKind::Created, LifecycleKind::CheckedIn, LifecycleKind::Completed]
    );
    assert_eq!(
        f.engine.get_reservation(result.reservation_id).unwrap().status,
        ReservationStatus::Completed
    );
    let window = Span::new(start, start + 2 * HOUR_MS);
    assert_eq!(f.engine.spot_availability("B-1", window).await.unwrap(), vec![window]);
}
