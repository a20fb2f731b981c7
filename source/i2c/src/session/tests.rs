use std::thread;

use super::*;
use crate::{
    device::Revision,
    ipc::{Reply, Request},
    port::{self, Client, ClosedError, ConnectError, Notifier},
    test_util::TestBuses,
    ResultCode,
};

/// A service running on its own control thread.
struct Running {
    t: TestBuses,
    registry: Registry,
    notifier: Notifier,
    control: JoinHandle<Result<(), Error>>,
}

impl Running {
    fn start(revision: Revision) -> Self {
        let t = TestBuses::new(revision);
        let registry = Registry::new();
        let (notifier, notifications) = port::notifications();
        let settings = ServiceSettings {
            revision,
            ..Default::default()
        };
        let manager =
            SessionManager::new(registry.clone(), t.i2c.clone(), settings, notifications).unwrap();
        let control = thread::Builder::new()
            .name("i2c::control".into())
            .spawn(move || manager.run())
            .unwrap();
        Self {
            t,
            registry,
            notifier,
            control,
        }
    }

    fn connect(&self, category: Category) -> Client {
        self.registry.connect(category.service_name()).unwrap()
    }

    fn terminate(self) -> (Registry, Result<(), Error>) {
        self.notifier.notify(TERMINATE_NOTIFICATION).unwrap();
        let result = self.control.join().unwrap();
        (self.registry, result)
    }
}

fn write8(dev: u8, reg: u8, value: u8) -> Request {
    Request::new(0x0005)
        .with_param(dev as u32)
        .with_param(reg as u32)
        .with_param(value as u32)
}

fn read8(dev: u8, reg: u8) -> Request {
    Request::new(0x0009)
        .with_param(dev as u32)
        .with_param(reg as u32)
}

fn value(reply: &Reply) -> u32 {
    assert_eq!(reply.result, ResultCode::SUCCESS, "{reply:?}");
    reply.params[0]
}

#[test]
fn endpoints_follow_the_revision() {
    for (revision, served) in [(Revision::Base, 7), (Revision::Revised, 9)] {
        let running = Running::start(revision);
        for category in Category::ALL {
            assert_eq!(
                running.registry.is_registered(category.service_name()),
                (category as usize) < served,
                "{category} on {revision}"
            );
        }

        let (registry, result) = running.terminate();
        assert_eq!(result, Ok(()));
        for category in Category::ALL {
            assert!(!registry.is_registered(category.service_name()));
        }
    }
}

#[test]
fn requests_round_trip() {
    let running = Running::start(Revision::Base);
    let mcu = running.connect(Category::Mcu);

    let reply = mcu.request(write8(3, 0x20, 0x5A)).unwrap();
    assert_eq!(reply.result, ResultCode::SUCCESS);
    assert_eq!(reply.header.command_id(), 0x0005);

    let reply = mcu.request(read8(3, 0x20)).unwrap();
    assert_eq!(value(&reply), 0x5A);

    // the camera belongs to another category
    let reply = mcu.request(write8(1, 0x20, 0x5A)).unwrap();
    assert_eq!(reply.result, ResultCode::I2C_NOT_AUTHORIZED);

    let reply = mcu.request(Request::new(0x0042)).unwrap();
    assert_eq!(reply, Reply::error(ResultCode::OS_INVALID_IPCARG));

    drop(mcu);
    assert_eq!(running.terminate().1, Ok(()));
}

#[test]
fn categories_are_served_concurrently() {
    let running = Running::start(Revision::Base);
    let mcu = running.connect(Category::Mcu);
    let hid = running.connect(Category::Hid);

    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..32 {
                let reply = mcu.request(write8(0, i, i)).unwrap();
                assert_eq!(reply.result, ResultCode::SUCCESS);
            }
        });
        s.spawn(|| {
            for i in 0..32 {
                let reply = hid.request(write8(9, i, !i)).unwrap();
                assert_eq!(reply.result, ResultCode::SUCCESS);
            }
        });
    });

    for i in 0..32 {
        assert_eq!(value(&mcu.request(read8(0, i)).unwrap()), i as u32);
        assert_eq!(value(&hid.request(read8(9, i)).unwrap()), !i as u32);
    }
    assert_eq!(running.terminate().1, Ok(()));
}

#[test]
fn second_connection_replaces_the_first() {
    let running = Running::start(Revision::Base);

    let first = running.connect(Category::Lcd);
    assert_eq!(first.request(write8(5, 1, 0xAA)).unwrap().result, ResultCode::SUCCESS);

    // does not return until the first session's worker has been joined
    let second = running.connect(Category::Lcd);
    assert_eq!(first.request(read8(5, 1)), Err(ClosedError));
    assert_eq!(value(&second.request(read8(5, 1)).unwrap()), 0xAA);

    // other categories are untouched
    let deb = running.connect(Category::Deb);
    assert_eq!(deb.request(write8(7, 0, 1)).unwrap().result, ResultCode::SUCCESS);
    assert_eq!(second.request(write8(6, 0, 1)).unwrap().result, ResultCode::SUCCESS);

    assert_eq!(running.terminate().1, Ok(()));
}

#[test]
fn hanging_up_frees_the_endpoint() {
    let running = Running::start(Revision::Base);

    for round in 0..4 {
        let eep = running.connect(Category::Eep);
        let reply = eep.request(write8(14, 0, round)).unwrap();
        assert_eq!(reply.result, ResultCode::SUCCESS);
        drop(eep);
    }

    let eep = running.connect(Category::Eep);
    assert_eq!(value(&eep.request(read8(14, 0)).unwrap()), 3);
    assert_eq!(running.terminate().1, Ok(()));
}

#[test]
fn terminate_closes_sessions() {
    let running = Running::start(Revision::Revised);
    let nfc = running.connect(Category::Nfc);
    let qtm = running.connect(Category::Qtm);
    assert_eq!(nfc.request(write8(15, 0, 1)).unwrap().result, ResultCode::SUCCESS);
    assert_eq!(qtm.request(write8(16, 0, 1)).unwrap().result, ResultCode::SUCCESS);

    let (registry, result) = running.terminate();
    assert_eq!(result, Ok(()));

    assert_eq!(nfc.request(read8(15, 0)), Err(ClosedError));
    assert_eq!(qtm.request(read8(16, 0)), Err(ClosedError));
    assert_eq!(
        registry.connect(Category::Nfc.service_name()).unwrap_err(),
        ConnectError::NotFound(Category::Nfc.service_name().into())
    );
}

#[test]
fn other_notifications_are_ignored() {
    let running = Running::start(Revision::Base);
    let cam = running.connect(Category::Cam);

    running.notifier.notify(0x001).unwrap();
    running.notifier.notify(0x101).unwrap();
    assert_eq!(cam.request(write8(2, 0, 7)).unwrap().result, ResultCode::SUCCESS);
    assert_eq!(value(&cam.request(read8(2, 0)).unwrap()), 7);

    assert_eq!(running.terminate().1, Ok(()));
}

#[test]
fn dropping_every_notifier_stops_the_service() {
    let Running {
        t,
        registry,
        notifier,
        control,
    } = Running::start(Revision::Base);

    let ir = registry.connect(Category::Ir.service_name()).unwrap();
    drop(notifier);
    assert_eq!(control.join().unwrap(), Ok(()));

    assert_eq!(ir.request(read8(13, 0)), Err(ClosedError));
    assert!(!registry.is_registered(Category::Ir.service_name()));
    assert_eq!(t.total_register_writes(), 0);
}

#[test]
fn duplicate_endpoints_are_an_internal_fault() {
    let t = TestBuses::new(Revision::Base);
    let registry = Registry::new();
    let _squatter = registry.register(Category::Hid.service_name(), 1).unwrap();

    let (_notifier, notifications) = port::notifications();
    let err = SessionManager::new(
        registry.clone(),
        t.i2c.clone(),
        ServiceSettings::default(),
        notifications,
    )
    .unwrap_err();
    assert!(matches!(err, Error::InternalFault(_)), "{err:?}");

    // the endpoints registered before the failure were rolled back
    assert!(!registry.is_registered(Category::Mcu.service_name()));
    assert!(registry.is_registered(Category::Hid.service_name()));
}
