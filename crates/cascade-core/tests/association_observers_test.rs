use std::sync::Arc;

use cascade_core::{
    fields, CascadeError, ConfigurationError, DeliveryBackend, DeliveryError, DispatchQueue,
    Engine, Event, MemoryStore, Notifier, NotifierRegistry, ObserveSpec, Propagation, Reach,
    Record, RecordId, RecordRef, Schema, SchemaBuilder, SetFieldNotifier, WorkItem,
};
use parking_lot::Mutex;
use serde_json::json;

const OBSERVED: [&str; 7] = [
    "belongs_to_observable_test",
    "has_one_observable_test",
    "collection_observable_test",
    "has_many_through_observable_tests",
    "polymorphic_has_many_observable_tests",
    "has_many_observable_tests",
    "habtm_observable_tests",
];

/// Records every observer it is asked to notify.
struct Counting {
    name: &'static str,
    singles: Mutex<Vec<RecordRef>>,
    pages: Mutex<Vec<Vec<RecordId>>>,
}

impl Counting {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            singles: Mutex::new(Vec::new()),
            pages: Mutex::new(Vec::new()),
        })
    }
}

impl Notifier for Counting {
    fn name(&self) -> &str {
        self.name
    }

    fn action(&self, _: &Propagation<'_>, _: &Record, observer: &Record) -> anyhow::Result<()> {
        self.singles.lock().push(observer.to_ref());
        Ok(())
    }

    fn as_batch(&self) -> Option<&dyn cascade_core::BatchNotifier> {
        Some(self)
    }
}

impl cascade_core::BatchNotifier for Counting {
    fn notify_many(
        &self,
        _: &Propagation<'_>,
        _: &Record,
        observers: &[Record],
    ) -> anyhow::Result<()> {
        self.pages
            .lock()
            .push(observers.iter().map(|o| o.id).collect());
        Ok(())
    }
}

struct Explode;

impl Notifier for Explode {
    fn name(&self) -> &str {
        "explode"
    }

    fn action(&self, _: &Propagation<'_>, _: &Record, observer: &Record) -> anyhow::Result<()> {
        anyhow::bail!("cannot notify {}", observer.to_ref())
    }
}

struct Refusing;

impl DeliveryBackend for Refusing {
    fn name(&self) -> &str {
        "refusing"
    }

    fn submit(
        &self,
        _: &WorkItem,
        _: &mut dyn FnMut(&WorkItem) -> cascade_core::Result<()>,
    ) -> cascade_core::Result<()> {
        Err(DeliveryError::Unavailable("worker is down".into()).into())
    }
}

fn registry() -> NotifierRegistry {
    NotifierRegistry::new()
        .with(Arc::new(SetFieldNotifier::flag("mark_updated", "updated")))
        .with(Arc::new(SetFieldNotifier::flag("mark_deleted", "deleted")))
        .with(Arc::new(Explode))
}

fn observer_schema() -> SchemaBuilder {
    Schema::builder()
        .entity("observer_test", |e| {
            e.belongs_to("belongs_to_observable_test", "belongs_to_observable_test")
                .belongs_to("collection_observable_test", "collection_observable_test")
                .has_one("has_one_observable_test", "has_one_observable_test")
                .has_many("has_many_observable_tests", "has_many_observable_test")
                .has_many_through("has_many_through_observable_tests", "has_many_observable_tests")
                .has_many_as(
                    "polymorphic_has_many_observable_tests",
                    "polymorphic_has_many_observable_test",
                    "observer",
                )
                .has_one("observer_observer_test", "observer_observer_test")
                .has_and_belongs_to_many("habtm_observable_tests", "habtm_observable_test")
                .observes(
                    ObserveSpec::new(["habtm_observable_tests"])
                        .notifiers(["mark_updated"])
                        .on([Event::Create]),
                )
                .observes(ObserveSpec::new(OBSERVED).notifiers(["mark_updated"]).on([Event::Update]))
                .observes(ObserveSpec::new(OBSERVED).notifiers(["mark_deleted"]).on([Event::Destroy]))
                .observes(ObserveSpec::new(["has_many_observable_tests"]).notifiers(["count_updates"]))
        })
        .entity("belongs_to_observable_test", |e| e.has_one("observer_test", "observer_test"))
        .entity("collection_observable_test", |e| e.has_many("observer_tests", "observer_test"))
        .entity("has_one_observable_test", |e| e.belongs_to("observer_test", "observer_test"))
        .entity("has_many_observable_test", |e| {
            e.belongs_to("observer_test", "observer_test")
                .has_many("has_many_through_observable_tests", "has_many_through_observable_test")
        })
        .entity("has_many_through_observable_test", |e| {
            e.belongs_to("has_many_observable_test", "has_many_observable_test")
                .has_one_through("observer_test", "has_many_observable_test")
        })
        .entity("polymorphic_has_many_observable_test", |e| e.belongs_to_polymorphic("observer"))
        .entity("habtm_observable_test", |e| {
            e.has_and_belongs_to_many("observer_tests", "observer_test")
        })
        .entity("observer_observer_test", |e| {
            e.belongs_to("observer_test", "observer_test")
                .observes(ObserveSpec::new(["observer_test"]).notifiers(["mark_updated"]))
        })
        .entity("other_observer_test", |e| {
            e.has_many_as(
                "polymorphic_has_many_observable_tests",
                "polymorphic_has_many_observable_test",
                "observer",
            )
        })
}

struct Fixture {
    engine: Engine,
    counter: Arc<Counting>,
}

impl Fixture {
    fn new() -> Self {
        let counter = Counting::new("count_updates");
        let schema = observer_schema()
            .build(&registry().with(counter.clone()))
            .unwrap();
        let notifiers = registry().with(counter.clone());
        let engine = Engine::new(
            Arc::new(schema),
            Arc::new(notifiers),
            Arc::new(MemoryStore::new()),
        );
        Self { engine, counter }
    }

    fn create(&self, type_name: &str, pairs: &[(&str, serde_json::Value)]) -> Record {
        self.engine
            .create(type_name, fields(pairs.iter().cloned()))
            .unwrap()
    }

    fn observer(&self) -> Record {
        self.create("observer_test", &[])
    }

    fn rename(&self, record: &Record, name: &str) {
        self.engine
            .update(&record.to_ref(), fields([("name", name)]))
            .unwrap();
    }

    fn reset(&self, record: &Record) {
        self.engine
            .update_columns(
                &record.to_ref(),
                fields([("updated", false), ("deleted", false)]),
            )
            .unwrap();
    }

    fn reload(&self, record: &Record) -> Record {
        self.engine.get(&record.to_ref()).unwrap().unwrap()
    }
}

#[test]
fn observer_and_observable_bits() {
    let fx = Fixture::new();
    let schema = fx.engine.schema();
    assert!(schema.is_observer("observer_observer_test"));
    assert!(!schema.is_observable("observer_observer_test"));
    assert!(schema.is_observable("belongs_to_observable_test"));
    assert!(!schema.is_observer("belongs_to_observable_test"));
    // Observed by observer_observer_test while observing others itself.
    assert!(schema.is_observer("observer_test"));
    assert!(schema.is_observable("observer_test"));
}

#[test]
fn belongs_to_observable_update_marks_observer() {
    let fx = Fixture::new();
    let observer = fx.observer();
    let observable = fx.create("belongs_to_observable_test", &[]);
    fx.engine
        .update_columns(
            &observer.to_ref(),
            fields([("belongs_to_observable_test_id", observable.id)]),
        )
        .unwrap();

    fx.rename(&observable, "doof");

    assert_eq!(fx.reload(&observable).get_str("name"), Some("doof"));
    let observer = fx.reload(&observer);
    assert!(observer.is("updated"));
    assert!(!observer.is("deleted"));
}

#[test]
fn hidden_observable_does_not_notify() {
    let fx = Fixture::new();
    let observer = fx.observer();
    let observable = fx.create("belongs_to_observable_test", &[]);
    fx.engine
        .update_columns(
            &observer.to_ref(),
            fields([("belongs_to_observable_test_id", observable.id)]),
        )
        .unwrap();

    fx.engine.unobservable(&observable.to_ref());
    assert!(fx.engine.is_suppressed(&observable.to_ref()));
    fx.rename(&observable, "doof");
    fx.rename(&observable, "doofer");
    assert_eq!(fx.reload(&observable).get_str("name"), Some("doofer"));
    assert!(!fx.reload(&observer).is("updated"));

    fx.engine.observable(&observable.to_ref());
    fx.rename(&observable, "doofest");
    assert!(fx.reload(&observer).is("updated"));
}

#[test]
fn has_one_observable_update_marks_observer() {
    let fx = Fixture::new();
    let observer = fx.observer();
    let observable = fx.create("has_one_observable_test", &[("observer_test_id", json!(observer.id))]);

    fx.rename(&observable, "doof");

    let observer = fx.reload(&observer);
    assert!(observer.is("updated"));
    assert!(!observer.is("deleted"));
}

#[test]
fn has_many_update_notifies_observer_once() {
    let fx = Fixture::new();
    let observer = fx.observer();
    let items: Vec<_> = (0..3)
        .map(|_| fx.create("has_many_observable_test", &[("observer_test_id", json!(observer.id))]))
        .collect();

    fx.rename(&items[0], "doof");

    assert!(fx.reload(&observer).is("updated"));
    assert_eq!(*fx.counter.singles.lock(), vec![observer.to_ref()]);
    assert!(fx.counter.pages.lock().is_empty());
}

#[test]
fn has_many_destroy_marks_observer_deleted() {
    let fx = Fixture::new();
    let observer = fx.observer();
    let item = fx.create("has_many_observable_test", &[("observer_test_id", json!(observer.id))]);

    let removed = fx.engine.destroy(&item.to_ref()).unwrap();

    assert_eq!(removed.id, item.id);
    assert!(fx.engine.get(&item.to_ref()).unwrap().is_none());
    assert!(fx.reload(&observer).is("deleted"));
}

#[test]
fn polymorphic_update_reaches_only_tagged_observer() {
    let fx = Fixture::new();
    let first = fx.observer();
    let second = fx.observer();
    let tagged = |owner: &Record| {
        fx.create(
            "polymorphic_has_many_observable_test",
            &[
                ("observer_id", json!(owner.id)),
                ("observer_type", json!(owner.type_name)),
            ],
        )
    };
    let mine: Vec<_> = (0..3).map(|_| tagged(&first)).collect();
    tagged(&second);

    fx.rename(&mine[0], "doof");

    let first = fx.reload(&first);
    assert!(first.is("updated"));
    assert!(!first.is("deleted"));
    let second = fx.reload(&second);
    assert!(!second.is("updated"));
    assert!(!second.is("deleted"));
}

#[test]
fn polymorphic_record_of_unrelated_type_is_ignored() {
    let fx = Fixture::new();
    let observer = fx.observer();
    let other = fx.create("other_observer_test", &[]);
    assert_eq!(other.id, observer.id);

    let foreign = fx.create(
        "polymorphic_has_many_observable_test",
        &[
            ("observer_id", json!(other.id)),
            ("observer_type", json!("other_observer_test")),
        ],
    );
    fx.rename(&foreign, "doof");

    assert!(!fx.reload(&observer).is("updated"));
}

#[test]
fn has_many_through_update_marks_observer() {
    let fx = Fixture::new();
    let observer = fx.observer();
    let middle = fx.create("has_many_observable_test", &[("observer_test_id", json!(observer.id))]);
    let far = fx.create(
        "has_many_through_observable_test",
        &[("has_many_observable_test_id", json!(middle.id))],
    );
    fx.reset(&observer);

    fx.rename(&far, "doof");

    assert!(fx.reload(&observer).is("updated"));
    match fx.engine.reach(&observer, "has_many_through_observable_tests").unwrap() {
        Reach::Many(spec) => {
            assert_eq!(fx.engine.store().page_ids(&spec, 10, 0).unwrap(), vec![far.id])
        }
        other => panic!("expected a collection, got {other:?}"),
    }
}

#[test]
fn habtm_link_update_and_unlink() {
    let fx = Fixture::new();
    let observer = fx.observer();
    let tag = fx.create("habtm_observable_test", &[("name", json!("doof"))]);
    assert!(!fx.reload(&observer).is("updated"));

    assert!(fx
        .engine
        .link(&observer.to_ref(), "habtm_observable_tests", &tag.to_ref())
        .unwrap());
    assert!(fx.reload(&observer).is("updated"));
    assert!(!fx.reload(&observer).is("deleted"));

    fx.reset(&observer);
    fx.rename(&tag, "superdoof");
    assert!(fx.reload(&observer).is("updated"));

    fx.reset(&observer);
    assert!(fx
        .engine
        .unlink(&observer.to_ref(), "habtm_observable_tests", &tag.to_ref())
        .unwrap());
    assert!(fx.reload(&observer).is("deleted"));
    match fx.engine.reach(&observer, "habtm_observable_tests").unwrap() {
        Reach::Many(spec) => assert!(fx.engine.store().page_ids(&spec, 10, 0).unwrap().is_empty()),
        other => panic!("expected a collection, got {other:?}"),
    }
    assert!(!fx
        .engine
        .unlink(&observer.to_ref(), "habtm_observable_tests", &tag.to_ref())
        .unwrap());
}

#[test]
fn habtm_replacement_updates_and_deletes() {
    let fx = Fixture::new();
    let observer = fx.observer();
    let old = fx.create("habtm_observable_test", &[]);
    fx.engine
        .link(&observer.to_ref(), "habtm_observable_tests", &old.to_ref())
        .unwrap();
    fx.reset(&observer);

    let new = fx.create("habtm_observable_test", &[]);
    fx.engine
        .replace_links(&observer.to_ref(), "habtm_observable_tests", &[new.to_ref()])
        .unwrap();

    let observer = fx.reload(&observer);
    assert!(observer.is("updated"));
    assert!(observer.is("deleted"));
}

#[test]
fn link_rejects_non_habtm_association() {
    let fx = Fixture::new();
    let observer = fx.observer();
    let item = fx.create("has_many_observable_test", &[]);
    let err = fx
        .engine
        .link(&observer.to_ref(), "has_many_observable_tests", &item.to_ref())
        .unwrap_err();
    assert!(matches!(err, CascadeError::InvalidOperation(_)));
}

#[test]
fn collection_update_marks_every_observer() {
    let fx = Fixture::new();
    let collection = fx.create("collection_observable_test", &[]);
    let observers: Vec<_> = (0..2)
        .map(|_| fx.create("observer_test", &[("collection_observable_test_id", json!(collection.id))]))
        .collect();
    let bystander = fx.observer();

    fx.rename(&collection, "doof");

    for observer in &observers {
        let observer = fx.reload(observer);
        assert!(observer.is("updated"));
        assert!(!observer.is("deleted"));
    }
    assert!(!fx.reload(&bystander).is("updated"));
}

#[test]
fn observer_of_observer_is_notified() {
    let fx = Fixture::new();
    let observer = fx.observer();
    let watcher = fx.create("observer_observer_test", &[("observer_test_id", json!(observer.id))]);
    let item = fx.create("has_many_observable_test", &[("observer_test_id", json!(observer.id))]);
    let collection = fx.create("collection_observable_test", &[]);
    fx.engine
        .update_columns(
            &observer.to_ref(),
            fields([("collection_observable_test_id", collection.id)]),
        )
        .unwrap();

    fx.rename(&item, "doof");
    assert!(fx.reload(&observer).is("updated"));
    assert!(fx.reload(&watcher).is("updated"));

    fx.reset(&observer);
    fx.reset(&watcher);
    fx.rename(&collection, "doof");
    assert!(fx.reload(&observer).is("updated"));
    assert!(fx.reload(&watcher).is("updated"));
}

#[test]
fn destroying_collection_marks_every_observer_without_backend() {
    let counter = Counting::new("count_updates");
    let schema = observer_schema()
        .build(&registry().with(counter.clone()))
        .unwrap();
    let engine = Engine::new(
        Arc::new(schema),
        Arc::new(registry().with(counter)),
        Arc::new(MemoryStore::new()),
    )
    .with_dispatch(DispatchQueue::new(Arc::new(Refusing)));

    let collection = engine
        .create("collection_observable_test", Default::default())
        .unwrap();
    let observers: Vec<_> = (0..5)
        .map(|_| {
            engine
                .create(
                    "observer_test",
                    fields([("collection_observable_test_id", collection.id)]),
                )
                .unwrap()
        })
        .collect();

    let err = engine
        .update(&collection.to_ref(), fields([("name", "doof")]))
        .unwrap_err();
    assert!(matches!(err, CascadeError::Delivery(DeliveryError::Unavailable(_))));

    engine.destroy(&collection.to_ref()).unwrap();
    for observer in &observers {
        let observer = engine.get(&observer.to_ref()).unwrap().unwrap();
        assert!(observer.is("deleted"));
    }
}

#[test]
fn pages_cover_observers_regardless_of_remainder() {
    for (subscribers, batch) in [(7usize, 3usize), (6, 3), (2, 5)] {
        let counter = Counting::new("count");
        let notifiers = NotifierRegistry::new().with(counter.clone());
        let schema = Schema::builder()
            .entity("feed", |e| e.has_many("subscribers", "subscriber"))
            .entity("subscriber", |e| {
                e.belongs_to("feed", "feed")
                    .observes(ObserveSpec::new(["feed"]).notifiers(["count"]).batch_size(batch))
            })
            .build(&notifiers)
            .unwrap();
        let engine = Engine::new(Arc::new(schema), Arc::new(notifiers), Arc::new(MemoryStore::new()));

        let feed = engine.create("feed", Default::default()).unwrap();
        let other = engine.create("feed", Default::default()).unwrap();
        let mut expected = Vec::new();
        for n in 0..subscribers {
            expected.push(
                engine
                    .create("subscriber", fields([("feed_id", feed.id)]))
                    .unwrap()
                    .id,
            );
            if n % 2 == 0 {
                engine
                    .create("subscriber", fields([("feed_id", other.id)]))
                    .unwrap();
            }
        }

        engine
            .update(&feed.to_ref(), fields([("title", "news")]))
            .unwrap();

        let pages = counter.pages.lock();
        assert_eq!(pages.len(), subscribers.div_ceil(batch));
        assert!(pages.iter().all(|p| p.len() <= batch));
        let delivered: Vec<_> = pages.iter().flatten().copied().collect();
        assert_eq!(delivered, expected);
    }
}

#[test]
fn strategy_failure_propagates_and_aborts_destroy() {
    let notifiers = registry();
    let schema = Schema::builder()
        .entity("widget", |e| e.belongs_to("owner", "owner"))
        .entity("owner", |e| {
            e.has_one("widget", "widget").observes(
                ObserveSpec::new(["widget"])
                    .notifiers(["explode"])
                    .on([Event::Update, Event::Destroy]),
            )
        })
        .build(&notifiers)
        .unwrap();
    let engine = Engine::new(Arc::new(schema), Arc::new(notifiers), Arc::new(MemoryStore::new()));
    let owner = engine.create("owner", Default::default()).unwrap();
    let widget = engine
        .create("widget", fields([("owner_id", owner.id)]))
        .unwrap();

    let err = engine
        .update(&widget.to_ref(), fields([("name", "x")]))
        .unwrap_err();
    assert!(matches!(&err, CascadeError::Strategy { notifier, .. } if notifier == "explode"));

    assert!(engine.destroy(&widget.to_ref()).is_err());
    assert!(engine.get(&widget.to_ref()).unwrap().is_some());

    // Without an owner there is nobody to notify.
    let orphan = engine.create("widget", Default::default()).unwrap();
    engine
        .update(&orphan.to_ref(), fields([("name", "y")]))
        .unwrap();
}

#[test]
fn mutual_observers_do_not_loop() {
    let notifiers = registry();
    let schema = Schema::builder()
        .entity("left", |e| {
            e.belongs_to("right", "right")
                .observes(ObserveSpec::new(["right"]).notifiers(["mark_updated"]))
        })
        .entity("right", |e| {
            e.has_one("left", "left")
                .observes(ObserveSpec::new(["left"]).notifiers(["mark_updated"]))
        })
        .build(&notifiers)
        .unwrap();
    let engine = Engine::new(Arc::new(schema), Arc::new(notifiers), Arc::new(MemoryStore::new()));
    let right = engine.create("right", Default::default()).unwrap();
    let left = engine
        .create("left", fields([("right_id", right.id)]))
        .unwrap();

    engine
        .update(&left.to_ref(), fields([("name", "x")]))
        .unwrap();

    assert!(engine.get(&left.to_ref()).unwrap().unwrap().is("updated"));
    assert!(engine.get(&right.to_ref()).unwrap().unwrap().is("updated"));
}

#[test]
fn misconfigured_observers_fail_at_build() {
    let err = observer_schema()
        .entity("late_observer", |e| {
            e.belongs_to("observer_test", "observer_test")
                .observes(ObserveSpec::new(["missing_things"]).notifiers(["mark_updated"]))
        })
        .build(&registry().with(Counting::new("count_updates")))
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::UnknownAssociation { .. }));

    // `count_updates` is not registered.
    let err = observer_schema().build(&registry()).unwrap_err();
    assert_eq!(err, ConfigurationError::UnknownNotifier("count_updates".into()));
}

#[test]
fn habtm_membership_leaves_owner_lifecycle_alone() {
    let notifiers = registry();
    let schema = Schema::builder()
        .entity("watcher", |e| {
            e.belongs_to("post", "post")
                .observes(ObserveSpec::new(["post"]).notifiers(["mark_updated"]).on([Event::Create]))
                .observes(ObserveSpec::new(["post"]).notifiers(["mark_deleted"]).on([Event::Destroy]))
        })
        .entity("post", |e| {
            e.has_many("watchers", "watcher")
                .has_and_belongs_to_many("tags", "tag")
        })
        .entity("tag", |e| {
            e.has_and_belongs_to_many("posts", "post").observes(
                ObserveSpec::new(["posts"])
                    .notifiers(["mark_deleted"])
                    .on([Event::Destroy]),
            )
        })
        .build(&notifiers)
        .unwrap();
    let engine = Engine::new(Arc::new(schema), Arc::new(notifiers), Arc::new(MemoryStore::new()));

    let post = engine.create("post", Default::default()).unwrap();
    let watcher = engine
        .create("watcher", fields([("post_id", post.id)]))
        .unwrap();
    let tag = engine.create("tag", Default::default()).unwrap();

    assert!(engine.link(&post.to_ref(), "tags", &tag.to_ref()).unwrap());
    assert!(engine.unlink(&post.to_ref(), "tags", &tag.to_ref()).unwrap());

    assert!(engine.get(&post.to_ref()).unwrap().is_some());
    let reloaded = engine.get(&watcher.to_ref()).unwrap().unwrap();
    assert!(!reloaded.is("updated"));
    assert!(!reloaded.is("deleted"));
    // The tag observes its posts, so it hears about the removed link.
    assert!(engine.get(&tag.to_ref()).unwrap().unwrap().is("deleted"));

    engine.destroy(&post.to_ref()).unwrap();
    assert!(engine.get(&watcher.to_ref()).unwrap().unwrap().is("deleted"));
}

#[test]
fn self_referential_habtm_keeps_both_ends() {
    let notifiers = registry();
    let schema = Schema::builder()
        .entity("user", |e| e.has_and_belongs_to_many("friends", "user"))
        .build(&notifiers)
        .unwrap();
    let engine = Engine::new(Arc::new(schema), Arc::new(notifiers), Arc::new(MemoryStore::new()));
    let a = engine.create("user", Default::default()).unwrap();
    let b = engine.create("user", Default::default()).unwrap();

    assert!(engine.link(&a.to_ref(), "friends", &b.to_ref()).unwrap());
    assert!(!engine.link(&a.to_ref(), "friends", &b.to_ref()).unwrap());

    match engine.reach(&a, "friends").unwrap() {
        Reach::Many(spec) => assert_eq!(engine.store().page_ids(&spec, 10, 0).unwrap(), vec![b.id]),
        other => panic!("expected a collection, got {other:?}"),
    }
    match engine.reach(&b, "friends").unwrap() {
        Reach::Many(spec) => assert!(engine.store().page_ids(&spec, 10, 0).unwrap().is_empty()),
        other => panic!("expected a collection, got {other:?}"),
    }
}

#[test]
fn polymorphic_observer_hears_every_concrete_owner() {
    let notifiers = registry();
    let schema = Schema::builder()
        .entity("attachment", |e| {
            e.belongs_to_polymorphic("owner").observes(
                ObserveSpec::new(["owner"])
                    .notifiers(["mark_updated"])
                    .as_role("owner"),
            )
        })
        .entity("post", |e| e.has_many_as("attachments", "attachment", "owner"))
        .entity("album", |e| e.has_one_as("cover", "attachment", "owner"))
        .build(&notifiers)
        .unwrap();
    assert!(schema.is_observable("post"));
    assert!(schema.is_observable("album"));
    let engine = Engine::new(Arc::new(schema), Arc::new(notifiers), Arc::new(MemoryStore::new()));

    let post = engine.create("post", Default::default()).unwrap();
    let album = engine.create("album", Default::default()).unwrap();
    // Same numeric id, different owner types.
    assert_eq!(post.id, album.id);
    let on_post = engine
        .create(
            "attachment",
            fields([("owner_id", json!(post.id)), ("owner_type", json!("post"))]),
        )
        .unwrap();
    let on_album = engine
        .create(
            "attachment",
            fields([("owner_id", json!(album.id)), ("owner_type", json!("album"))]),
        )
        .unwrap();
    let reload = |r: &Record| engine.get(&r.to_ref()).unwrap().unwrap();

    engine
        .update(&post.to_ref(), fields([("title", "doof")]))
        .unwrap();
    assert!(reload(&on_post).is("updated"));
    assert!(!reload(&on_album).is("updated"));

    engine
        .update_columns(&on_post.to_ref(), fields([("updated", false)]))
        .unwrap();
    engine
        .update(&album.to_ref(), fields([("title", "doof")]))
        .unwrap();
    assert!(reload(&on_album).is("updated"));
    assert!(!reload(&on_post).is("updated"));
}
