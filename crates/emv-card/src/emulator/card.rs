//! Card, contactless card and mobile (HCE) emulator

use std::time::Duration;

use emv_common::dol::dol_data_len;
use emv_common::tlv::{decode, Tag, TlvBuilder};
use emv_common::{tags, TagStore};
use rand::Rng;
use tracing::{debug, warn};

use super::Endpoint;
use crate::apdu::{commands, ins, ApduCommand, ApduResponse, StatusWord};
use crate::engine::{CryptogramType, ResponseFormat};
use crate::profile::CardProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selected {
    Environment,
    Application,
}

/// Answers APDUs from a [`CardProfile`]
#[derive(Debug, Clone)]
pub struct CardEmulator {
    profile: CardProfile,
    selected: Option<Selected>,
    processing: bool,
    cryptograms: u8,
    atc: u16,
    pin_tries: u8,
    challenge: Option<[u8; 8]>,
}

impl CardEmulator {
    pub fn new(profile: CardProfile) -> Self {
        let atc = profile.atc;
        let pin_tries = profile.pin_tries;
        Self {
            profile,
            selected: None,
            processing: false,
            cryptograms: 0,
            atc,
            pin_tries,
            challenge: None,
        }
    }

    pub fn profile(&self) -> &CardProfile {
        &self.profile
    }

    /// Application Transaction Counter
    pub fn atc(&self) -> u16 {
        self.atc
    }

    pub fn pin_tries(&self) -> u8 {
        self.pin_tries
    }

    /// Last GET CHALLENGE answer
    pub fn challenge(&self) -> Option<[u8; 8]> {
        self.challenge
    }

    fn respond(&mut self, command: &ApduCommand) -> ApduResponse {
        match (command.cla, command.ins) {
            (0x00, ins::SELECT) => self.select(command),
            (0x80, ins::GET_PROCESSING_OPTIONS) => self.get_processing_options(command),
            (0x00, ins::READ_RECORD) => self.read_record(command),
            (0x80, ins::GET_DATA) => self.get_data(command),
            (0x80, ins::GENERATE_AC) => self.generate_ac(command),
            (0x00, ins::GET_CHALLENGE) => self.get_challenge(),
            (0x00, ins::VERIFY) => self.verify(command),
            (0x00, ins::INTERNAL_AUTHENTICATE) => self.internal_authenticate(command),
            (0x80, ins::COMPUTE_CRYPTOGRAPHIC_CHECKSUM) => self.compute_cryptographic_checksum(),
            (0x80, ins::EXCHANGE_RELAY_RESISTANCE_DATA) => self.exchange_relay_resistance_data(command),
            (0x00 | 0x80, _) => ApduResponse::error(StatusWord::INS_NOT_SUPPORTED),
            _ => ApduResponse::error(StatusWord::CLA_NOT_SUPPORTED),
        }
    }

    fn select(&mut self, command: &ApduCommand) -> ApduResponse {
        if command.p1 != 0x04 {
            return ApduResponse::error(StatusWord::INCORRECT_P1_P2);
        }
        let name = command.command_data().unwrap_or_default();
        self.selected = None;
        self.processing = false;
        self.cryptograms = 0;

        if name == self.profile.interface.environment() {
            self.selected = Some(Selected::Environment);
            return self.environment_fci(name);
        }
        if name == commands::PPSE || name == commands::PSE {
            return ApduResponse::error(StatusWord::FILE_NOT_FOUND);
        }

        let aid = &self.profile.aid;
        if !name.is_empty() && (aid.starts_with(name) || aid.ends_with(name)) {
            self.selected = Some(Selected::Application);
            return self.application_fci();
        }
        ApduResponse::error(StatusWord::FILE_NOT_FOUND)
    }

    /// PPSE/PSE FCI listing the single application
    fn environment_fci(&self, name: &[u8]) -> ApduResponse {
        let profile = &self.profile;
        let kernel = profile.kernel.map(|k| [k.byte()]);
        respond_with(TlvBuilder::new().constructed(tags::FCI_TEMPLATE, |fci| {
            fci.primitive(tags::DF_NAME, name)
                .constructed(tags::FCI_PROPRIETARY_TEMPLATE, |a5| {
                    a5.constructed(tags::FCI_ISSUER_DISCRETIONARY_DATA, |bf0c| {
                        bf0c.constructed(tags::DIRECTORY_ENTRY, |entry| {
                            entry
                                .primitive(tags::APPLICATION_IDENTIFIER, &profile.aid)
                                .primitive(tags::APPLICATION_LABEL, profile.label.as_bytes())
                                .primitive(tags::APPLICATION_PRIORITY_INDICATOR, [profile.priority])
                                .optional(tags::KERNEL_IDENTIFIER, kernel.as_ref().map(|k| &k[..]))
                        })
                    })
                })
        }))
    }

    fn application_fci(&self) -> ApduResponse {
        let profile = &self.profile;
        respond_with(TlvBuilder::new().constructed(tags::FCI_TEMPLATE, |fci| {
            fci.primitive(tags::DF_NAME, &profile.aid)
                .constructed(tags::FCI_PROPRIETARY_TEMPLATE, |a5| {
                    let mut a5 = a5
                        .primitive(tags::APPLICATION_LABEL, profile.label.as_bytes())
                        .primitive(tags::APPLICATION_PRIORITY_INDICATOR, [profile.priority]);
                    for (tag, value) in profile.fci.entries() {
                        a5 = a5.primitive(tag, value);
                    }
                    a5
                })
        }))
    }

    fn get_processing_options(&mut self, command: &ApduCommand) -> ApduResponse {
        if self.selected != Some(Selected::Application) {
            return ApduResponse::error(StatusWord::CONDITIONS_NOT_SATISFIED);
        }

        let data = command.command_data().unwrap_or_default();
        let template = match decode(data) {
            Ok(nodes) => nodes.into_iter().next(),
            Err(_) => None,
        };
        let Some(template) = template.filter(|n| n.tag() == tags::COMMAND_TEMPLATE) else {
            return ApduResponse::error(StatusWord::WRONG_DATA);
        };
        let expected = self
            .profile
            .pdol_entries()
            .map_or(0, |entries| dol_data_len(&entries));
        if template.length() != expected {
            return ApduResponse::error(StatusWord::WRONG_LENGTH);
        }

        self.processing = true;
        let profile = &self.profile;
        let afl = profile.afl_bytes();
        let builder = match profile.gpo_format {
            ResponseFormat::Format1 => {
                let mut value = profile.aip.clone();
                value.extend_from_slice(&afl);
                TlvBuilder::new().primitive(tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_1, value)
            }
            ResponseFormat::Format2 => TlvBuilder::new().constructed(
                tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_2,
                |t| {
                    let mut t = t.primitive(tags::AIP, &profile.aip).primitive(tags::AFL, &afl);
                    for (tag, value) in profile.gpo_data.entries() {
                        t = t.primitive(tag, value);
                    }
                    t
                },
            ),
        };
        respond_with(builder)
    }

    fn read_record(&self, command: &ApduCommand) -> ApduResponse {
        if self.selected != Some(Selected::Application) {
            return ApduResponse::error(StatusWord::CONDITIONS_NOT_SATISFIED);
        }
        if command.p2 & 0x07 != 0x04 {
            return ApduResponse::error(StatusWord::INCORRECT_P1_P2);
        }

        let sfi = command.p2 >> 3;
        match self.profile.record(sfi, command.p1) {
            Some(record) if record.readable => {
                respond_with(TlvBuilder::new().constructed(tags::RECORD_TEMPLATE, |t| {
                    record
                        .data
                        .entries()
                        .into_iter()
                        .fold(t, |t, (tag, value)| t.primitive(tag, value))
                }))
            }
            _ => ApduResponse::error(StatusWord::RECORD_NOT_FOUND),
        }
    }

    fn get_data(&self, command: &ApduCommand) -> ApduResponse {
        let tag = match command.p1 {
            0x00 => Tag::new(u32::from(command.p2)),
            p1 => Tag::new(u32::from(p1) << 8 | u32::from(command.p2)),
        };
        let value = match tag {
            tags::APPLICATION_TRANSACTION_COUNTER => Some(self.atc.to_be_bytes().to_vec()),
            tags::PIN_TRY_COUNTER => Some(vec![self.pin_tries]),
            _ => self.profile.find(tag).map(<[u8]>::to_vec),
        };
        match value {
            Some(value) => respond_with(TlvBuilder::new().primitive(tag, value)),
            None => ApduResponse::error(StatusWord::REFERENCED_DATA_NOT_FOUND),
        }
    }

    fn generate_ac(&mut self, command: &ApduCommand) -> ApduResponse {
        if !self.processing || self.cryptograms >= 2 {
            return ApduResponse::error(StatusWord::CONDITIONS_NOT_SATISFIED);
        }
        let Some(requested) = CryptogramType::from_cid(command.p1) else {
            return ApduResponse::error(StatusWord::INCORRECT_P1_P2);
        };

        let data = command.command_data().unwrap_or_default();
        let first = self.cryptograms == 0;
        if let Some(cdol) = self.profile.cdol_entries(first) {
            if data.len() != dol_data_len(&cdol) {
                return ApduResponse::error(StatusWord::WRONG_LENGTH);
            }
        }

        let cid = self.profile.decision.cid(requested);
        self.atc = self.atc.wrapping_add(1);
        self.cryptograms += 1;
        let mut cryptogram = [0u8; 8];
        rand::rng().fill(&mut cryptogram);
        debug!(
            requested = requested.name(),
            cid = format_args!("{cid:02X}"),
            atc = self.atc,
            "card generated cryptogram"
        );

        let atc = self.atc.to_be_bytes();
        let iad = self.profile.issuer_application_data.as_deref();
        let builder = match self.profile.gen_ac_format {
            ResponseFormat::Format1 => {
                let mut value = vec![cid];
                value.extend_from_slice(&atc);
                value.extend_from_slice(&cryptogram);
                TlvBuilder::new().primitive(tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_1, value)
            }
            ResponseFormat::Format2 => TlvBuilder::new().constructed(
                tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_2,
                |t| {
                    t.primitive(tags::CRYPTOGRAM_INFORMATION_DATA, [cid])
                        .primitive(tags::APPLICATION_TRANSACTION_COUNTER, atc)
                        .primitive(tags::APPLICATION_CRYPTOGRAM, cryptogram)
                        .optional(tags::ISSUER_APPLICATION_DATA, iad)
                },
            ),
        };
        respond_with(builder)
    }

    fn get_challenge(&mut self) -> ApduResponse {
        let mut challenge = [0u8; 8];
        rand::rng().fill(&mut challenge);
        self.challenge = Some(challenge);
        ApduResponse::success(challenge.to_vec())
    }

    /// Offline plaintext PIN check
    fn verify(&mut self, command: &ApduCommand) -> ApduResponse {
        match command.p2 {
            0x80 => {}
            0x88 => return ApduResponse::error(StatusWord::FUNCTION_NOT_SUPPORTED),
            _ => return ApduResponse::error(StatusWord::INCORRECT_P1_P2),
        }
        let Some(pin) = self.profile.pin.as_deref() else {
            return ApduResponse::error(StatusWord::REFERENCED_DATA_NOT_FOUND);
        };
        if self.pin_tries == 0 {
            return ApduResponse::error(StatusWord::AUTH_METHOD_BLOCKED);
        }
        let Some(entered) = parse_pin_block(command.command_data().unwrap_or_default()) else {
            return ApduResponse::error(StatusWord::WRONG_DATA);
        };

        if entered == pin {
            self.pin_tries = self.profile.pin_tries;
            ApduResponse::success(Vec::new())
        } else {
            self.pin_tries -= 1;
            ApduResponse::error(StatusWord::counter_warning(self.pin_tries))
        }
    }

    /// Dynamic data answer without real signing
    fn internal_authenticate(&self, command: &ApduCommand) -> ApduResponse {
        if self.selected != Some(Selected::Application) {
            return ApduResponse::error(StatusWord::CONDITIONS_NOT_SATISFIED);
        }
        if command.command_data().is_none() {
            return ApduResponse::error(StatusWord::WRONG_LENGTH);
        }
        let mut signed = [0u8; 8];
        rand::rng().fill(&mut signed);
        respond_with(TlvBuilder::new().primitive(tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_1, signed))
    }

    /// Mag-stripe mode CVC3 values
    fn compute_cryptographic_checksum(&mut self) -> ApduResponse {
        if !self.processing {
            return ApduResponse::error(StatusWord::CONDITIONS_NOT_SATISFIED);
        }
        self.atc = self.atc.wrapping_add(1);
        let mut rng = rand::rng();
        let track1: [u8; 2] = rng.random();
        let track2: [u8; 2] = rng.random();
        respond_with(TlvBuilder::new().constructed(
            tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_2,
            |t| {
                t.primitive(tags::CVC3_TRACK2, track2)
                    .primitive(tags::CVC3_TRACK1, track1)
                    .primitive(tags::APPLICATION_TRANSACTION_COUNTER, self.atc.to_be_bytes())
            },
        ))
    }

    /// Relay resistance: device entropy plus min/max/transmission times
    fn exchange_relay_resistance_data(&self, command: &ApduCommand) -> ApduResponse {
        if command.command_data().map(<[u8]>::len) != Some(4) {
            return ApduResponse::error(StatusWord::WRONG_LENGTH);
        }
        let mut value = [0u8; 10];
        rand::rng().fill(&mut value[..4]);
        value[4..].copy_from_slice(&[0x00, 0x0A, 0x00, 0x32, 0x00, 0x14]);
        respond_with(TlvBuilder::new().primitive(tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_1, value))
    }
}

impl Endpoint for CardEmulator {
    fn process_command(&mut self, command: &[u8]) -> ApduResponse {
        let command = match ApduCommand::from_bytes(command) {
            Ok(command) => command,
            Err(err) => {
                warn!("card rejected command: {err}");
                return ApduResponse::error(StatusWord::WRONG_LENGTH);
            }
        };
        let response = self.respond(&command);
        debug!(
            command = command.name(),
            sw = %response.status_word(),
            "card answered"
        );
        response
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(self.profile.latency_ms)
    }

    fn reset(&mut self) {
        *self = Self::new(self.profile.clone());
    }
}

fn respond_with(builder: TlvBuilder) -> ApduResponse {
    match builder.build() {
        Ok(data) => ApduResponse::success(data),
        Err(err) => {
            warn!("card could not encode response: {err}");
            ApduResponse::error(StatusWord::UNKNOWN_ERROR)
        }
    }
}

/// ISO 9564 format 2 plaintext PIN block (`2N PP..PF..F`)
pub fn pin_block(pin: &str) -> Option<Vec<u8>> {
    if !(4..=12).contains(&pin.len()) || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut nibbles: Vec<u8> = pin.bytes().map(|b| b - b'0').collect();
    nibbles.resize(14, 0x0F);
    let mut block = vec![0x20 | pin.len() as u8];
    block.extend(nibbles.chunks(2).map(|pair| pair[0] << 4 | pair[1]));
    Some(block)
}

/// Digits of a format 2 PIN block
pub fn parse_pin_block(block: &[u8]) -> Option<String> {
    let (&control, digits) = block.split_first()?;
    let length = usize::from(control & 0x0F);
    if block.len() != 8 || control & 0xF0 != 0x20 || !(4..=12).contains(&length) {
        return None;
    }
    let nibbles: Vec<u8> = digits.iter().flat_map(|b| [b >> 4, b & 0x0F]).collect();
    let (pin, filler) = nibbles.split_at(length);
    if pin.iter().any(|&n| n > 9) || filler.iter().any(|&n| n != 0x0F) {
        return None;
    }
    Some(pin.iter().map(|n| char::from(b'0' + n)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{CardDecision, CardKind};
    use emv_common::tlv::find_in;

    fn card(kind: CardKind) -> CardEmulator {
        CardEmulator::new(CardProfile::preset(kind))
    }

    fn send(card: &mut CardEmulator, command: ApduCommand) -> ApduResponse {
        card.process_command(&command.to_bytes().unwrap())
    }

    fn select_and_gpo(card: &mut CardEmulator, pdol_data: &[u8]) {
        let aid = card.profile().aid.clone();
        let select = commands::select(&aid, commands::SelectOccurrence::First);
        assert!(send(card, select).is_success());
        let gpo = commands::get_processing_options(pdol_data).unwrap();
        assert!(send(card, gpo).is_success());
    }

    #[test]
    fn test_ppse_lists_application() {
        let mut card = card(CardKind::CommonKernel);
        let response = send(&mut card, commands::select_ppse());
        assert!(response.is_success());
        let nodes = decode(&response.data).unwrap();
        assert_eq!(
            find_in(&nodes, tags::APPLICATION_IDENTIFIER).map(|n| n.value()),
            Some(crate::profile::aids::DISCOVER)
        );
        assert_eq!(
            find_in(&nodes, tags::KERNEL_IDENTIFIER).map(|n| n.value()),
            Some(&[0x08][..])
        );
    }

    #[test]
    fn test_contact_card_has_no_ppse() {
        let mut card = card(CardKind::VisaContact);
        assert_eq!(
            send(&mut card, commands::select_ppse()).status_word(),
            StatusWord::FILE_NOT_FOUND
        );
        assert!(send(&mut card, commands::select_pse()).is_success());
    }

    #[test]
    fn test_partial_aid_selection() {
        let mut card = card(CardKind::VisaContactless);
        let prefix = commands::select(&[0xA0, 0x00, 0x00, 0x00, 0x03], commands::SelectOccurrence::First);
        assert!(send(&mut card, prefix).is_success());
        let other = commands::select(crate::profile::aids::MASTERCARD, commands::SelectOccurrence::First);
        assert_eq!(send(&mut card, other).status_word(), StatusWord::FILE_NOT_FOUND);
    }

    #[test]
    fn test_gpo_requires_selection_and_pdol_length() {
        let mut card = card(CardKind::VisaContactless);
        let gpo = commands::get_processing_options(&[0; 16]).unwrap();
        assert_eq!(
            send(&mut card, gpo.clone()).status_word(),
            StatusWord::CONDITIONS_NOT_SATISFIED
        );
        let select = commands::select(crate::profile::aids::VISA, commands::SelectOccurrence::First);
        send(&mut card, select);
        let short = commands::get_processing_options(&[0; 4]).unwrap();
        assert_eq!(send(&mut card, short).status_word(), StatusWord::WRONG_LENGTH);
        assert!(send(&mut card, gpo).is_success());
    }

    #[test]
    fn test_format1_gpo_carries_afl() {
        let mut card = card(CardKind::VisaContact);
        let select = commands::select(crate::profile::aids::VISA, commands::SelectOccurrence::First);
        send(&mut card, select);
        let response = send(&mut card, commands::get_processing_options(&[]).unwrap());
        assert_eq!(
            hex::encode_upper(&response.data),
            "800A5C000801020010010101"
        );
    }

    #[test]
    fn test_read_record_and_missing_record() {
        let mut card = card(CardKind::NonCompliantWearable);
        select_and_gpo(&mut card, &[]);
        assert!(send(&mut card, commands::read_record(1, 1)).is_success());
        assert_eq!(
            send(&mut card, commands::read_record(2, 1)).status_word(),
            StatusWord::RECORD_NOT_FOUND
        );
        assert_eq!(
            send(&mut card, commands::read_record(9, 1)).status_word(),
            StatusWord::RECORD_NOT_FOUND
        );
    }

    #[test]
    fn test_generate_ac_increments_atc() {
        let mut card = card(CardKind::MastercardContactless);
        select_and_gpo(&mut card, &[]);
        let before = card.atc();
        let response = send(
            &mut card,
            commands::generate_ac(CryptogramType::Tc, false, vec![0; 29]),
        );
        assert!(response.is_success());
        assert_eq!(card.atc(), before + 1);
        let nodes = decode(&response.data).unwrap();
        assert_eq!(
            find_in(&nodes, tags::CRYPTOGRAM_INFORMATION_DATA).map(|n| n.value()),
            Some(&[0x80][..])
        );
        assert_eq!(
            find_in(&nodes, tags::APPLICATION_CRYPTOGRAM).map(|n| n.length()),
            Some(8)
        );
    }

    #[test]
    fn test_generate_ac_checks_cdol_length() {
        let mut card = card(CardKind::MastercardContactless);
        select_and_gpo(&mut card, &[]);
        let response = send(
            &mut card,
            commands::generate_ac(CryptogramType::Arqc, false, vec![0; 3]),
        );
        assert_eq!(response.status_word(), StatusWord::WRONG_LENGTH);
    }

    #[test]
    fn test_undefined_decision() {
        let profile = CardProfile::preset(CardKind::AmexContactless)
            .with_decision(CardDecision::Undefined);
        let mut card = CardEmulator::new(profile);
        select_and_gpo(&mut card, &[0x22]);
        let response = send(
            &mut card,
            commands::generate_ac(CryptogramType::Arqc, false, vec![0; 29]),
        );
        // Format 1: 80 LL CID ...
        assert_eq!(response.data[2], 0xC0);
    }

    #[test]
    fn test_verify_pin() {
        let mut card = card(CardKind::VisaContact);
        let wrong = commands::verify(pin_block("9999").unwrap(), commands::PinFormat::Plaintext);
        assert_eq!(send(&mut card, wrong).status_word(), StatusWord::counter_warning(2));
        let right = commands::verify(pin_block("1234").unwrap(), commands::PinFormat::Plaintext);
        assert!(send(&mut card, right).is_success());
        assert_eq!(card.pin_tries(), 3);
    }

    #[test]
    fn test_pin_block_format() {
        let block = pin_block("1234").unwrap();
        assert_eq!(hex::encode_upper(&block), "241234FFFFFFFFFF");
        assert_eq!(parse_pin_block(&block).as_deref(), Some("1234"));
        assert!(pin_block("12a4").is_none());
        assert!(parse_pin_block(&[0x24, 0x12]).is_none());
    }

    #[test]
    fn test_reset_restores_power_on_state() {
        let mut card = card(CardKind::MastercardContactless);
        select_and_gpo(&mut card, &[]);
        send(&mut card, commands::generate_ac(CryptogramType::Arqc, false, vec![0; 29]));
        card.reset();
        assert_eq!(card.atc(), card.profile().atc);
        assert_eq!(
            send(&mut card, commands::read_record(1, 1)).status_word(),
            StatusWord::CONDITIONS_NOT_SATISFIED
        );
    }

    #[test]
    fn test_unknown_instruction() {
        let mut card = card(CardKind::VisaContactless);
        let response = card.process_command(&[0x00, 0x12, 0x00, 0x00]);
        assert_eq!(response.status_word(), StatusWord::INS_NOT_SUPPORTED);
        let response = card.process_command(&[0x00]);
        assert_eq!(response.status_word(), StatusWord::WRONG_LENGTH);
    }

    #[test]
    fn test_relay_resistance_and_checksum() {
        let mut card = card(CardKind::MastercardContactless);
        select_and_gpo(&mut card, &[]);
        let errd = send(&mut card, commands::exchange_relay_resistance_data([1, 2, 3, 4]));
        assert_eq!(errd.data.len(), 12);
        let ccc = send(&mut card, commands::compute_cryptographic_checksum(vec![0; 4]));
        let nodes = decode(&ccc.data).unwrap();
        assert!(find_in(&nodes, tags::CVC3_TRACK2).is_some());
    }
}
