//! Modem conversation behaviour over a scripted serial port.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{transport, REFERENCE_FRAME};
use tanksync::clock::{Clock, Cooperate, ManualClock};
use tanksync::radio::serial::MockSerial;
use tanksync::radio::{
    ExchangeOutcome, HardwarePresence, RadioBusy, RadioError, RadioTiming, RadioTransport,
};
use tanksync::settings::RadioSettings;

#[test]
fn initialize_probes_then_configures_in_order() {
    let modem = MockSerial::new();
    modem.acknowledge_all();
    let clock = ManualClock::new(0);
    let mut radio = transport(&modem, &clock);

    radio.initialize(&RadioSettings::default()).unwrap();

    assert_eq!(radio.presence(), HardwarePresence::Present);
    assert_eq!(
        modem.written(),
        vec![
            "AT".to_string(),
            "AT+ADDRESS=2".to_string(),
            "AT+NETWORKID=6".to_string(),
            "AT+BAND=865000000".to_string(),
        ]
    );
}

#[test]
fn silent_modem_is_marked_absent_for_good() {
    let modem = MockSerial::new();
    let clock = ManualClock::new(0);
    let mut radio = transport(&modem, &clock);

    let err = radio.initialize(&RadioSettings::default()).unwrap_err();
    assert!(matches!(
        err,
        RadioError::Rejected {
            ref command,
            outcome: ExchangeOutcome::Timeout
        } if command == "AT"
    ));
    assert_eq!(radio.presence(), HardwarePresence::Absent);
    assert_eq!(clock.now_ms(), RadioTiming::default().exchange_timeout_ms);

    // Later configuration attempts do not touch the port.
    assert!(matches!(
        radio.configure(&RadioSettings::default()),
        Err(RadioError::HardwareAbsent)
    ));
    assert_eq!(modem.written(), vec!["AT".to_string()]);
}

#[test]
fn rejected_band_marks_hardware_absent() {
    let modem = MockSerial::new();
    modem.respond("AT+BAND", "+ERR=4").acknowledge_all();
    let clock = ManualClock::new(0);
    let mut radio = transport(&modem, &clock);

    let err = radio.initialize(&RadioSettings::default()).unwrap_err();
    assert!(matches!(
        err,
        RadioError::Rejected {
            ref command,
            outcome: ExchangeOutcome::Nack
        } if command == "AT+BAND=865000000"
    ));
    assert_eq!(radio.presence(), HardwarePresence::Absent);
}

#[test]
fn frame_arriving_mid_exchange_is_kept() {
    let modem = MockSerial::new();
    modem.respond("AT+SEND", "+RCV=3,20,TANK:50:90:3.90:77,-55,9\r\n+OK");
    let clock = ManualClock::new(0);
    let mut radio = transport(&modem, &clock);

    assert_eq!(radio.send(3, "ACK:76"), ExchangeOutcome::Ack);
    assert_eq!(modem.written(), vec!["AT+SEND=3,6,ACK:76".to_string()]);
    assert_eq!(
        radio.next_line().as_deref(),
        Some("+RCV=3,20,TANK:50:90:3.90:77,-55,9")
    );
    assert_eq!(radio.next_line(), None);
}

#[test]
fn exchange_keeps_buffered_frames_and_ends_quiet_partial_line() {
    let modem = MockSerial::new();
    modem.acknowledge_all();
    modem.push_line(REFERENCE_FRAME);
    modem.push_bytes(b"+RCV=2,3,ab");
    let clock = ManualClock::new(0);
    let mut radio = transport(&modem, &clock);
    radio.poll_input();
    clock.advance(RadioTiming::default().partial_line_timeout_ms);

    // The reply is not glued onto the truncated frame.
    assert_eq!(radio.exchange("AT", 1_000), ExchangeOutcome::Ack);
    assert_eq!(radio.next_line().as_deref(), Some(REFERENCE_FRAME));
    assert_eq!(radio.next_line().as_deref(), Some("+RCV=2,3,ab"));
    assert_eq!(radio.next_line(), None);
    assert!(!radio.has_pending_input());
}

#[test]
fn frame_still_arriving_at_exchange_start_is_completed() {
    let modem = MockSerial::new();
    // The modem finishes the frame in flight before it answers the command.
    modem.respond("AT+SEND", "LO,-40,9\r\n+OK");
    modem.push_bytes(b"+RCV=2,5,HEL");
    let clock = ManualClock::new(0);
    let mut radio = transport(&modem, &clock);
    radio.poll_input();

    assert_eq!(radio.send(2, "ACK:1"), ExchangeOutcome::Ack);
    assert_eq!(radio.next_line().as_deref(), Some("+RCV=2,5,HELLO,-40,9"));
    assert_eq!(radio.next_line(), None);
}

#[test]
fn noise_in_front_of_a_frame_mid_exchange_is_stripped() {
    let modem = MockSerial::new();
    modem.respond("AT+SEND", "\u{0}+RCV=3,5,HELLO,-50,4\r\n+OK");
    let clock = ManualClock::new(0);
    let mut radio = transport(&modem, &clock);

    assert_eq!(radio.send(3, "ACK:9"), ExchangeOutcome::Ack);
    assert_eq!(radio.next_line().as_deref(), Some("+RCV=3,5,HELLO,-50,4"));
}

#[test]
fn stale_reply_is_not_taken_for_the_next_answer() {
    let modem = MockSerial::new();
    modem.push_line("+OK");
    let clock = ManualClock::new(0);
    let mut radio = transport(&modem, &clock);

    assert_eq!(radio.exchange("AT", 300), ExchangeOutcome::Timeout);
    assert_eq!(clock.now_ms(), 300);
}

#[test]
fn write_failure_is_a_nack_without_waiting() {
    let modem = MockSerial::new();
    modem.acknowledge_all();
    modem.set_fail_writes(true);
    let clock = ManualClock::new(40);
    let mut radio = transport(&modem, &clock);

    assert_eq!(radio.exchange("AT", 1_000), ExchangeOutcome::Nack);
    assert_eq!(clock.now_ms(), 40);
}

#[test]
fn partial_input_counts_as_radio_activity_until_it_goes_quiet() {
    let modem = MockSerial::new();
    let clock = ManualClock::new(0);
    let mut radio = transport(&modem, &clock);
    assert!(radio.activity().is_quiet());

    modem.push_bytes(b"+RCV=1,20,TANK:4");
    assert!(!radio.activity().is_quiet());

    radio.poll_input();
    assert_eq!(radio.next_line(), None);
    let activity = radio.activity();
    assert!(activity.pending_input);
    assert!(!activity.busy);

    clock.advance(RadioTiming::default().partial_line_timeout_ms);
    assert!(radio.activity().is_quiet());

    // The quiet fragment comes out as a line of its own.
    radio.poll_input();
    assert_eq!(radio.next_line().as_deref(), Some("+RCV=1,20,TANK:4"));
    assert_eq!(radio.next_line(), None);
}

/// Cooperative hook that records whether the busy flag was up while the transport waited.
struct BusyWatch {
    clock: ManualClock,
    flag: Rc<RefCell<Option<RadioBusy>>>,
    seen_busy: Rc<Cell<bool>>,
}

impl Cooperate for BusyWatch {
    fn yield_now(&mut self) {
        if let Some(flag) = self.flag.borrow().as_ref() {
            if flag.is_raised() {
                self.seen_busy.set(true);
            }
        }
        self.clock.advance(10);
    }
}

#[test]
fn busy_flag_is_up_only_while_waiting_on_the_modem() {
    let modem = MockSerial::new();
    let clock = ManualClock::new(0);
    let flag = Rc::new(RefCell::new(None));
    let seen_busy = Rc::new(Cell::new(false));
    let mut radio = RadioTransport::new(
        Box::new(modem.clone()),
        Rc::new(clock.clone()),
        Box::new(BusyWatch {
            clock: clock.clone(),
            flag: Rc::clone(&flag),
            seen_busy: Rc::clone(&seen_busy),
        }),
        RadioTiming::default(),
    );
    *flag.borrow_mut() = Some(radio.busy_flag());

    assert_eq!(radio.exchange("AT", 100), ExchangeOutcome::Timeout);
    assert!(seen_busy.get());
    assert!(!radio.busy_flag().is_raised());
}
